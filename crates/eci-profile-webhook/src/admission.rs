//! AdmissionReview protocol for the Pod mutation endpoint.
//!
//! Both `admission.k8s.io/v1` and `admission.k8s.io/v1beta1` are served. The
//! two versions share one request and response shape, so a v1beta1 review is
//! handed to the v1 handler unchanged; the response carries the request's
//! `apiVersion` back.
//!
//! Outcomes:
//!
//! - malformed envelope or non-pod resource: [`ApiError`] (HTTP 4xx, the API
//!   server's `failurePolicy=Ignore` admits the Pod unmutated)
//! - Pod decode, lookup or policy failure: `allowed: false` with the message
//!   (the Pod is rejected)
//! - otherwise `allowed: true`, with a JSON Patch when there is one
//!
//! The object is decoded as a [`DynamicObject`] first so that a body which is
//! not a valid Pod can still be answered with the request's `uid`.

use eci_profile_policy::{pod_ref, PatchInstruction, PolicyEngine};
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::GroupVersionResource;
use tracing::{debug, info, trace, warn};

use crate::error::ApiError;

const REVIEW_KIND: &str = "AdmissionReview";

/// Review envelope as exchanged with the API server.
pub type Review = AdmissionReview<DynamicObject>;

/// Request carried by a [`Review`].
pub type Request = AdmissionRequest<DynamicObject>;

/// AdmissionReview schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewVersion {
    /// `admission.k8s.io/v1`.
    V1,
    /// `admission.k8s.io/v1beta1`.
    V1Beta1,
}

impl ReviewVersion {
    /// The `apiVersion` string.
    #[must_use]
    pub const fn api_version(self) -> &'static str {
        match self {
            Self::V1 => "admission.k8s.io/v1",
            Self::V1Beta1 => "admission.k8s.io/v1beta1",
        }
    }

    fn from_api_version(api_version: &str) -> Option<Self> {
        match api_version {
            "admission.k8s.io/v1" => Some(Self::V1),
            "admission.k8s.io/v1beta1" => Some(Self::V1Beta1),
            _ => None,
        }
    }
}

/// Decode a review body into its version and request.
///
/// # Errors
///
/// Fails if the body is not a review, names an unserved version or kind, or
/// has no request.
pub fn decode_review(body: &[u8]) -> Result<(ReviewVersion, Request), ApiError> {
    let review: Review =
        serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))?;

    let version = ReviewVersion::from_api_version(&review.types.api_version)
        .filter(|_| review.types.kind == REVIEW_KIND)
        .ok_or_else(|| {
            ApiError::UnsupportedKind(format!(
                "{}, Kind={}",
                review.types.api_version, review.types.kind
            ))
        })?;

    let request: Request = review.try_into().map_err(|_| ApiError::MissingRequest)?;
    Ok((version, request))
}

/// Answer a raw review body.
///
/// # Errors
///
/// Returns an [`ApiError`] for envelope problems. Policy failures are
/// reported inside the review as a denial.
pub fn review(engine: &PolicyEngine, body: &[u8]) -> Result<Review, ApiError> {
    trace!(body = %String::from_utf8_lossy(body), "handling admission request");

    let (version, request) = decode_review(body)?;
    if version == ReviewVersion::V1Beta1 {
        debug!(uid = %request.uid, "delegating v1beta1 review to v1 handler");
    }

    let review = mutate_pod(engine, &request)?.into_review();
    trace!(?review, "sending admission response");
    Ok(review)
}

/// The v1 Pod mutation handler.
///
/// # Errors
///
/// Fails with [`ApiError::UnsupportedResource`] unless the request targets
/// core/v1 pods, and with [`ApiError::Internal`] if the patch cannot be
/// encoded.
pub fn mutate_pod(engine: &PolicyEngine, request: &Request) -> Result<AdmissionResponse, ApiError> {
    info!(
        uid = %request.uid,
        namespace = request.namespace.as_deref().unwrap_or_default(),
        name = %request.name,
        operation = ?request.operation,
        resource = %describe(&request.resource),
        "admission review"
    );

    if !is_pods(&request.resource) {
        return Err(ApiError::UnsupportedResource(describe(&request.resource)));
    }

    let response = AdmissionResponse::from(request);

    if let Some(sub_resource) = request.sub_resource.as_deref().filter(|s| !s.is_empty()) {
        debug!(uid = %request.uid, sub_resource, "admitting pod sub-resource unchanged");
        return Ok(response);
    }

    let mut pod = match decode_pod(request) {
        Ok(pod) => pod,
        Err(message) => {
            warn!(uid = %request.uid, error = %message, "failed to decode pod");
            return Ok(response.deny(message));
        }
    };
    // Pods under creation often carry no namespace of their own.
    pod.metadata.namespace.clone_from(&request.namespace);

    let patches = match engine.on_pod_creating(&pod) {
        Ok(patches) => patches,
        Err(e) => {
            warn!(pod = %pod_ref(&pod), error = %e, "denying pod");
            return Ok(response.deny(e.to_string()));
        }
    };

    if patches.is_empty() {
        return Ok(response);
    }

    let patch = json_patch(&patches).map_err(|e| ApiError::Internal(e.to_string()))?;
    debug!(pod = %pod_ref(&pod), ?patch, "patch data");
    response
        .with_patch(patch)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn is_pods(resource: &GroupVersionResource) -> bool {
    resource.group.is_empty() && resource.version == "v1" && resource.resource == "pods"
}

fn describe(resource: &GroupVersionResource) -> String {
    format!(
        "{}/{}, Resource={}",
        resource.group, resource.version, resource.resource
    )
}

fn decode_pod(request: &Request) -> Result<Pod, String> {
    let object = request
        .object
        .as_ref()
        .ok_or_else(|| "admission request has no object".to_string())?;
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(|e| format!("decode pod: {e}"))
}

fn json_patch(patches: &[PatchInstruction]) -> serde_json::Result<json_patch::Patch> {
    serde_json::from_value(serde_json::to_value(patches)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eci_profile_core::{FairPolicy, PolicySource, Selector, SelectorSpec, SideEffect};
    use eci_profile_policy::{MockResourceCache, ResourceCache};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn engine(cache: Arc<MockResourceCache>) -> PolicyEngine {
        let cache: Arc<dyn ResourceCache> = cache;
        PolicyEngine::new(cache)
    }

    fn fair_engine() -> (PolicyEngine, Arc<MockResourceCache>) {
        let cache = Arc::new(MockResourceCache::new());
        cache.insert_selector(Selector::new(
            "burst",
            SelectorSpec {
                priority: Some(10),
                policy: Some(PolicySource {
                    fair: Some(FairPolicy {}),
                    ..Default::default()
                }),
                effect: Some(SideEffect {
                    labels: Some(BTreeMap::from([("tier".to_string(), "eci".to_string())])),
                    annotations: None,
                }),
                ..Default::default()
            },
        ));
        (engine(cache.clone()), cache)
    }

    fn review_body(api_version: &str, resource: Value, object: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "apiVersion": api_version,
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": resource,
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": {"username": "admin"},
                "object": object,
            }
        }))
        .unwrap()
    }

    fn pods() -> Value {
        json!({"group": "", "version": "v1", "resource": "pods"})
    }

    fn pod_object() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"generateName": "web-"},
            "spec": {"containers": [{"name": "app", "image": "nginx"}]}
        })
    }

    fn response(review: &Review) -> &AdmissionResponse {
        review.response.as_ref().unwrap()
    }

    fn decoded_patch(response: &AdmissionResponse) -> Value {
        serde_json::from_slice(response.patch.as_ref().unwrap()).unwrap()
    }

    fn status_message(review: &Review) -> String {
        let wire = serde_json::to_value(review).unwrap();
        wire["response"]["status"]["message"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    #[test]
    fn v1_review_gets_patch() {
        let (engine, _) = fair_engine();
        let body = review_body("admission.k8s.io/v1", pods(), pod_object());

        let review = review(&engine, &body).unwrap();
        assert_eq!(review.types.api_version, "admission.k8s.io/v1");
        assert_eq!(review.types.kind, "AdmissionReview");
        assert_eq!(response(&review).uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert!(response(&review).allowed);

        let wire = serde_json::to_value(&review).unwrap();
        assert_eq!(wire["response"]["patchType"], "JSONPatch");

        let patch = decoded_patch(response(&review));
        assert_eq!(
            patch,
            json!([
                {
                    "op": "add",
                    "path": "/spec/tolerations",
                    "value": [{
                        "key": "k8s.aliyun.com/vnode",
                        "operator": "Equal",
                        "value": "true",
                        "effect": "NoSchedule"
                    }]
                },
                {"op": "add", "path": "/metadata/labels", "value": {"tier": "eci"}}
            ])
        );
    }

    #[test]
    fn v1beta1_review_keeps_its_version() {
        let (engine, _) = fair_engine();
        let body = review_body("admission.k8s.io/v1beta1", pods(), pod_object());

        let review = review(&engine, &body).unwrap();
        assert_eq!(review.types.api_version, "admission.k8s.io/v1beta1");
        assert_eq!(review.types.kind, "AdmissionReview");
        assert!(response(&review).allowed);
        assert!(response(&review).patch.is_some());
    }

    #[test]
    fn no_match_allows_without_patch() {
        let engine = engine(Arc::new(MockResourceCache::new()));
        let body = review_body("admission.k8s.io/v1", pods(), pod_object());

        let review = review(&engine, &body).unwrap();
        assert!(response(&review).allowed);
        assert!(response(&review).patch.is_none());
        assert!(response(&review).patch_type.is_none());

        let wire = serde_json::to_value(&review).unwrap();
        assert!(wire["response"].get("patch").is_none());
        assert!(wire["response"].get("patchType").is_none());
    }

    #[test]
    fn lookup_failure_denies() {
        let (engine, cache) = fair_engine();
        cache.set_unavailable(Some("cache not synced"));
        let body = review_body("admission.k8s.io/v1", pods(), pod_object());

        let review = review(&engine, &body).unwrap();
        assert!(!response(&review).allowed);
        assert_eq!(response(&review).uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
        let message = status_message(&review);
        assert!(message.contains("cache not synced"), "{message}");
    }

    #[test]
    fn undecodable_pod_denies() {
        let (engine, _) = fair_engine();
        let body = review_body(
            "admission.k8s.io/v1",
            pods(),
            json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "web-0"},
                "spec": {"containers": "not-a-list"}
            }),
        );

        let review = review(&engine, &body).unwrap();
        assert!(!response(&review).allowed);
        assert!(status_message(&review).starts_with("decode pod"));
    }

    #[test]
    fn non_pod_resource_is_rejected() {
        let (engine, _) = fair_engine();
        let body = review_body(
            "admission.k8s.io/v1",
            json!({"group": "apps", "version": "v1", "resource": "deployments"}),
            json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web"}}),
        );

        let err = review(&engine, &body).unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedResource(ref r) if r == "apps/v1, Resource=deployments"));
    }

    #[test]
    fn pod_binding_is_admitted_unchanged() {
        let (engine, _) = fair_engine();
        let mut review_json: Value = serde_json::from_slice(&review_body(
            "admission.k8s.io/v1",
            pods(),
            json!({"apiVersion": "v1", "kind": "Binding", "metadata": {"name": "web-0"}}),
        ))
        .unwrap();
        review_json["request"]["subResource"] = json!("binding");

        let review = review(&engine, &serde_json::to_vec(&review_json).unwrap()).unwrap();
        assert!(response(&review).allowed);
        assert!(response(&review).patch.is_none());
    }

    #[test]
    fn request_namespace_is_used_for_resolution() {
        let cache = Arc::new(MockResourceCache::new());
        cache.insert_namespace("burst-ns", &[("eci", "true")]);
        cache.insert_selector(Selector::new(
            "ns-scoped",
            SelectorSpec {
                namespace_labels: Some(
                    serde_json::from_value(json!({"matchLabels": {"eci": "true"}})).unwrap(),
                ),
                policy: Some(PolicySource {
                    fair: Some(FairPolicy {}),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ));
        let engine = engine(cache);

        let mut body: Value =
            serde_json::from_slice(&review_body("admission.k8s.io/v1", pods(), pod_object()))
                .unwrap();
        body["request"]["namespace"] = json!("burst-ns");

        let review = review(&engine, &serde_json::to_vec(&body).unwrap()).unwrap();
        assert!(response(&review).allowed);
        assert!(response(&review).patch.is_some());
    }

    #[test]
    fn decode_rejects_unknown_versions() {
        let body = br#"{"apiVersion":"admission.k8s.io/v2","kind":"AdmissionReview"}"#;
        assert!(matches!(
            decode_review(body),
            Err(ApiError::UnsupportedKind(_))
        ));

        let body = br#"{"apiVersion":"admission.k8s.io/v1","kind":"Pod"}"#;
        assert!(matches!(
            decode_review(body),
            Err(ApiError::UnsupportedKind(_))
        ));

        let body = br#"{"apiVersion":"admission.k8s.io/v1","kind":"AdmissionReview"}"#;
        assert!(matches!(decode_review(body), Err(ApiError::MissingRequest)));

        assert!(matches!(decode_review(b"{"), Err(ApiError::Decode(_))));
    }

    #[test]
    fn instructions_convert_to_json_patch() {
        let patch = json_patch(&[
            PatchInstruction::add("/metadata/labels", json!({"a": "b"})),
            PatchInstruction::replace("/spec/nodeSelector", json!({"type": "virtual-kubelet"})),
        ])
        .unwrap();

        assert_eq!(patch.0.len(), 2);
        let mut pod = json!({"metadata": {}, "spec": {"nodeSelector": {}}});
        json_patch::patch(&mut pod, &patch.0).unwrap();
        assert_eq!(pod["metadata"]["labels"]["a"], "b");
        assert_eq!(pod["spec"]["nodeSelector"]["type"], "virtual-kubelet");
    }
}
