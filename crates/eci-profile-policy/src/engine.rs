//! Resolve-then-execute entry points used by the webhook and the reconciler.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::cache::ResourceCache;
use crate::error::Result;
use crate::executor::PolicyKind;
use crate::patch::{PatchDocument, PatchInstruction};
use crate::resolver::SelectorResolver;

/// Resolves the governing Selector for a Pod and runs its policy.
pub struct PolicyEngine<C: ?Sized = dyn ResourceCache> {
    resolver: SelectorResolver<C>,
}

impl<C: ?Sized> Clone for PolicyEngine<C> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
        }
    }
}

impl<C: ResourceCache + ?Sized> PolicyEngine<C> {
    /// Create an engine reading from `cache`.
    #[must_use]
    pub fn new(cache: Arc<C>) -> Self {
        Self {
            resolver: SelectorResolver::new(cache),
        }
    }

    /// The underlying resolver.
    #[must_use]
    pub fn resolver(&self) -> &SelectorResolver<C> {
        &self.resolver
    }

    /// JSON Patch operations for a Pod being admitted.
    ///
    /// Returns an empty list when no Selector matches.
    ///
    /// # Errors
    ///
    /// Fails if resolution fails or a patch cannot be encoded.
    pub fn on_pod_creating(&self, pod: &Pod) -> Result<Vec<PatchInstruction>> {
        let Some(selector) = self.resolver.resolve(pod)? else {
            debug!(pod = %pod_ref(pod), "no selector matches pod");
            return Ok(Vec::new());
        };

        let policy = PolicyKind::of(&selector.spec);
        let patches = policy.on_pod_creating(&selector.spec, pod)?;
        info!(
            pod = %pod_ref(pod),
            selector = %selector.name_any(),
            %policy,
            patches = patches.len(),
            "matched selector on pod creation"
        );
        Ok(patches)
    }

    /// Merge patch for a Pod the scheduler reported as unschedulable.
    ///
    /// # Errors
    ///
    /// Fails if resolution fails.
    pub fn on_pod_unscheduled(&self, pod: &Pod) -> Result<Option<PatchDocument>> {
        let Some(selector) = self.resolver.resolve(pod)? else {
            debug!(pod = %pod_ref(pod), "no selector matches unschedulable pod");
            return Ok(None);
        };

        let policy = PolicyKind::of(&selector.spec);
        let patch = policy.on_pod_unscheduled(&selector.spec, pod);
        info!(
            pod = %pod_ref(pod),
            selector = %selector.name_any(),
            %policy,
            patched = patch.is_some(),
            "matched selector on unschedulable pod"
        );
        Ok(patch)
    }
}

/// `namespace/name` for log fields, falling back to `generateName` for Pods
/// that have not been named yet.
#[must_use]
pub fn pod_ref(pod: &Pod) -> String {
    let name = pod
        .metadata
        .name
        .as_deref()
        .or(pod.metadata.generate_name.as_deref())
        .unwrap_or_default();
    format!("{}/{}", pod.namespace().unwrap_or_default(), name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::mock::MockResourceCache;
    use crate::error::PolicyError;
    use crate::toleration::virtual_node_toleration;
    use eci_profile_core::{
        FairPolicy, NormalNodeOnlyPolicy, PolicySource, Selector, SelectorSpec, SideEffect,
    };
    use kube::api::ObjectMeta;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn engine_with(selectors: Vec<Selector>) -> PolicyEngine<MockResourceCache> {
        let cache = Arc::new(MockResourceCache::new());
        for selector in selectors {
            cache.insert_selector(selector);
        }
        PolicyEngine::new(cache)
    }

    fn fair_tier_eci(priority: i32) -> Selector {
        Selector::new(
            "fair-eci",
            SelectorSpec {
                policy: Some(PolicySource {
                    fair: Some(FairPolicy {}),
                    ..Default::default()
                }),
                effect: Some(SideEffect {
                    annotations: None,
                    labels: Some(BTreeMap::from([("tier".to_string(), "eci".to_string())])),
                }),
                priority: Some(priority),
                ..Default::default()
            },
        )
    }

    fn bare_pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn fair_selector_end_to_end() {
        let engine = engine_with(vec![fair_tier_eci(10)]);
        let patches = engine.on_pod_creating(&bare_pod()).unwrap();

        assert_eq!(patches.len(), 2);
        assert_eq!(
            serde_json::to_value(&patches).unwrap(),
            json!([
                {
                    "op": "add",
                    "path": "/spec/tolerations",
                    "value": [serde_json::to_value(virtual_node_toleration()).unwrap()]
                },
                {"op": "add", "path": "/metadata/labels", "value": {"tier": "eci"}}
            ])
        );
    }

    #[test]
    fn higher_priority_policy_is_dispatched() {
        let never_virtual = Selector::new(
            "normal-only",
            SelectorSpec {
                policy: Some(PolicySource {
                    normal_node_only: Some(NormalNodeOnlyPolicy {}),
                    ..Default::default()
                }),
                priority: Some(20),
                ..Default::default()
            },
        );
        let engine = engine_with(vec![fair_tier_eci(10), never_virtual]);

        assert!(engine.on_pod_creating(&bare_pod()).unwrap().is_empty());
        assert!(engine.on_pod_unscheduled(&bare_pod()).unwrap().is_none());
    }

    #[test]
    fn no_selector_means_no_patch() {
        let engine = engine_with(Vec::new());
        assert!(engine.on_pod_creating(&bare_pod()).unwrap().is_empty());
        assert!(engine.on_pod_unscheduled(&bare_pod()).unwrap().is_none());
    }

    #[test]
    fn unscheduled_fair_pod_gets_merge_patch() {
        let engine = engine_with(vec![fair_tier_eci(0)]);
        let doc = engine.on_pod_unscheduled(&bare_pod()).unwrap().unwrap();
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({
                "metadata": {"labels": {"tier": "eci"}},
                "spec": {"tolerations": [serde_json::to_value(virtual_node_toleration()).unwrap()]}
            })
        );
    }

    #[test]
    fn lookup_failure_propagates() {
        let cache = Arc::new(MockResourceCache::new());
        cache.set_unavailable(Some("cache not started"));
        let engine: PolicyEngine<MockResourceCache> = PolicyEngine::new(cache);

        let err = engine.on_pod_creating(&bare_pod()).unwrap_err();
        assert!(matches!(err, PolicyError::Lookup(_)));
        assert!(err.to_string().contains("cache not started"));
    }

    #[test]
    fn works_through_a_trait_object() {
        let cache: Arc<dyn ResourceCache> = Arc::new(MockResourceCache::new());
        let engine: PolicyEngine = PolicyEngine::new(cache);
        assert!(engine.on_pod_creating(&bare_pod()).unwrap().is_empty());
    }

    #[test]
    fn pod_ref_prefers_name() {
        assert_eq!(pod_ref(&bare_pod()), "default/web-0");

        let pending = Pod {
            metadata: ObjectMeta {
                generate_name: Some("web-".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(pod_ref(&pending), "default/web-");
    }
}
