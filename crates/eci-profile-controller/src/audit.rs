//! Logs Selector changes.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use eci_profile_core::Selector;
use kube::ResourceExt;
use tracing::{info, trace};

use crate::cache::ResourceEventHandler;

/// Selector event handler that records configuration changes in the log.
///
/// Updates that leave the Selector unchanged, such as those produced by a
/// relist or a resync, are skipped.
#[derive(Debug, Default)]
pub struct SelectorAuditHandler {
    recorded: AtomicU64,
}

impl SelectorAuditHandler {
    /// Create the handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of changes logged so far.
    #[must_use]
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    fn record(&self) {
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl ResourceEventHandler<Selector> for SelectorAuditHandler {
    async fn on_add(&self, selector: &Selector) {
        self.record();
        info!(
            selector = %selector.name_any(),
            uid = ?selector.uid(),
            priority = selector.spec.priority(),
            "selector added"
        );
        trace!(?selector, "selector payload");
    }

    async fn on_update(&self, old: &Selector, new: &Selector) {
        if old == new {
            return;
        }
        self.record();
        info!(
            selector = %new.name_any(),
            uid = ?new.uid(),
            priority = new.spec.priority(),
            "selector updated"
        );
        trace!(?old, ?new, "selector payload");
    }

    async fn on_delete(&self, selector: &Selector) {
        self.record();
        info!(
            selector = %selector.name_any(),
            uid = ?selector.uid(),
            "selector deleted"
        );
    }
}
