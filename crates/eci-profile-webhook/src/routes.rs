//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, inject};
use crate::state::WebhookState;

/// Create the webhook router with all routes and middleware.
///
/// # Routes
///
/// - `POST {config.path}` - Pod mutation (`/inject` by default)
/// - `GET /healthz` - Liveness
pub fn create_router(state: WebhookState) -> Router {
    let path = state.config.path.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = state.config.request_timeout();

    let state = Arc::new(state);

    Router::new()
        .route(&path, post(inject::inject))
        .route("/healthz", get(health::healthz))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Review;
    use crate::config::WebhookConfig;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use eci_profile_core::{Selector, SelectorSpec};
    use eci_profile_policy::{MockResourceCache, PolicyEngine, ResourceCache};
    use serde_json::{json, Value};

    fn server(config: WebhookConfig) -> (TestServer, Arc<MockResourceCache>) {
        let cache = Arc::new(MockResourceCache::new());
        let shared: Arc<dyn ResourceCache> = cache.clone();
        let state = WebhookState::new(PolicyEngine::new(shared), config);
        (TestServer::new(create_router(state)).unwrap(), cache)
    }

    fn review(api_version: &str) -> Value {
        json!({
            "apiVersion": api_version,
            "kind": "AdmissionReview",
            "request": {
                "uid": "b7b4a0f1-1c2d-4e5f-8a9b-0c1d2e3f4a5b",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": {"username": "system:serviceaccount:kube-system:job-controller"},
                "object": {
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": {"name": "job-1"},
                    "spec": {"containers": [{"name": "main", "image": "busybox"}]}
                }
            }
        })
    }

    #[tokio::test]
    async fn healthz_is_empty_ok() {
        let (server, _) = server(WebhookConfig::default());
        let response = server.get("/healthz").await;
        response.assert_status_ok();
        assert!(response.as_bytes().is_empty());
    }

    #[tokio::test]
    async fn inject_pins_pod_to_virtual_nodes() {
        let (server, cache) = server(WebhookConfig::default());
        // No policy set falls back to virtual-node-only.
        cache.insert_selector(Selector::new("all", SelectorSpec::default()));

        let response = server.post("/inject").json(&review("admission.k8s.io/v1")).await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(body["response"]["uid"], "b7b4a0f1-1c2d-4e5f-8a9b-0c1d2e3f4a5b");
        assert_eq!(body["response"]["allowed"], true);
        assert_eq!(body["response"]["patchType"], "JSONPatch");

        let review: Review = response.json();
        let raw = review.response.unwrap().patch.unwrap();
        let patch: Value = serde_json::from_slice(&raw).unwrap();
        assert!(patch
            .as_array()
            .unwrap()
            .iter()
            .any(|op| op["op"] == "replace" && op["path"] == "/spec/nodeSelector"));
    }

    #[tokio::test]
    async fn inject_answers_v1beta1() {
        let (server, _) = server(WebhookConfig::default());
        let response = server
            .post("/inject")
            .json(&review("admission.k8s.io/v1beta1"))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["apiVersion"], "admission.k8s.io/v1beta1");
        assert_eq!(body["response"]["allowed"], true);
        assert!(body["response"].get("patch").is_none());
    }

    #[tokio::test]
    async fn empty_body_is_bad_request() {
        let (server, _) = server(WebhookConfig::default());
        let response = server
            .post("/inject")
            .content_type("application/json")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "empty_body");
    }

    #[tokio::test]
    async fn non_json_content_type_is_rejected() {
        let (server, _) = server(WebhookConfig::default());
        let response = server.post("/inject").text("hello").await;
        response.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn non_pod_resource_is_bad_request() {
        let (server, _) = server(WebhookConfig::default());
        let mut body = review("admission.k8s.io/v1");
        body["request"]["resource"] = json!({"group": "", "version": "v1", "resource": "services"});

        let response = server.post("/inject").json(&body).await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unavailable_cache_denies_admission() {
        let (server, cache) = server(WebhookConfig::default());
        cache.set_unavailable(Some("informers not synced"));

        let response = server.post("/inject").json(&review("admission.k8s.io/v1")).await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["response"]["allowed"], false);
        assert!(body["response"]["status"]["message"]
            .as_str()
            .unwrap()
            .contains("informers not synced"));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let (server, _) = server(WebhookConfig {
            max_body_bytes: 64,
            ..WebhookConfig::default()
        });
        let response = server.post("/inject").json(&review("admission.k8s.io/v1")).await;
        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn custom_path_is_served() {
        let (server, _) = server(WebhookConfig {
            path: "/mutate".to_string(),
            ..WebhookConfig::default()
        });
        server
            .post("/mutate")
            .json(&review("admission.k8s.io/v1"))
            .await
            .assert_status_ok();
        server
            .post("/inject")
            .json(&review("admission.k8s.io/v1"))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
