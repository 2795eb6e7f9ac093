//! Re-patches Pods the scheduler could not place.
//!
//! The reconciler subscribes to Pod add/update events. When a Pod reports
//! `PodScheduled=False` with reason `Unschedulable`, the governing Selector's
//! policy decides whether the Pod should now tolerate virtual nodes, and the
//! resulting merge patch is sent to the API server.
//!
//! Failures are logged and dropped. The Pod is retried when a later status
//! update arrives or when the informer next resyncs.

use std::sync::Arc;

use async_trait::async_trait;
use eci_profile_policy::{pod_ref, PatchDocument, PolicyEngine};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{info, trace, warn};

use crate::cache::ResourceEventHandler;
use crate::error::Result;
use crate::patcher::PodPatcher;

const POD_SCHEDULED: &str = "PodScheduled";
const REASON_UNSCHEDULABLE: &str = "Unschedulable";

/// Whether the scheduler has marked the Pod unschedulable.
///
/// Pods without conditions are never unschedulable. When `PodScheduled`
/// appears more than once, the last entry decides.
#[must_use]
pub fn is_unscheduled(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_deref())
        .and_then(|conditions| {
            conditions
                .iter()
                .rev()
                .find(|c| c.type_ == POD_SCHEDULED)
        })
        .is_some_and(|c| c.status == "False" && c.reason.as_deref() == Some(REASON_UNSCHEDULABLE))
}

/// Pod event handler that applies `on_pod_unscheduled` patches.
pub struct UnscheduledReconciler {
    engine: PolicyEngine,
    patcher: Arc<dyn PodPatcher>,
}

impl UnscheduledReconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(engine: PolicyEngine, patcher: Arc<dyn PodPatcher>) -> Self {
        Self { engine, patcher }
    }

    /// Reconcile one Pod, returning the patch that was applied.
    ///
    /// # Errors
    ///
    /// Fails if resolution fails or the patch is rejected by the API server.
    pub async fn reconcile(&self, pod: &Pod) -> Result<Option<PatchDocument>> {
        if !is_unscheduled(pod) {
            trace!(pod = %pod_ref(pod), "pod is not unschedulable");
            return Ok(None);
        }

        let Some(patch) = self.engine.on_pod_unscheduled(pod)? else {
            return Ok(None);
        };

        let namespace = pod.namespace().unwrap_or_default();
        self.patcher
            .merge_patch(&namespace, &pod.name_any(), &patch)
            .await?;
        info!(pod = %pod_ref(pod), "patched unschedulable pod");
        Ok(Some(patch))
    }

    async fn handle(&self, pod: &Pod) {
        if let Err(e) = self.reconcile(pod).await {
            warn!(pod = %pod_ref(pod), error = %e, "failed to reconcile unschedulable pod");
        }
    }
}

#[async_trait]
impl ResourceEventHandler<Pod> for UnscheduledReconciler {
    async fn on_add(&self, pod: &Pod) {
        self.handle(pod).await;
    }

    async fn on_update(&self, _old: &Pod, new: &Pod) {
        self.handle(new).await;
    }

    async fn on_delete(&self, _pod: &Pod) {}
}
