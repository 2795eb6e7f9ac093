//! Read access to cached cluster state.
//!
//! The resolver only needs two reads: every Selector, and one Namespace by
//! name. The controller crate implements [`ResourceCache`] on top of kube
//! reflectors; tests use [`mock::MockResourceCache`].

use std::sync::Arc;

use eci_profile_core::Selector;
use k8s_openapi::api::core::v1::Namespace;

use crate::error::LookupError;

/// Snapshot reads against the local cache.
///
/// Each call is individually consistent; two calls made during one resolution
/// may observe different cache generations.
pub trait ResourceCache: Send + Sync {
    /// All cached Selectors, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Unavailable`] if the Selector cache cannot be read.
    fn list_selectors(&self) -> Result<Vec<Arc<Selector>>, LookupError>;

    /// The Namespace with the given name.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::NamespaceNotFound`] if it is not cached.
    fn get_namespace(&self, name: &str) -> Result<Arc<Namespace>, LookupError>;
}

/// In-memory cache for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use kube::ResourceExt;
    use parking_lot::RwLock;
    use std::collections::{BTreeMap, HashMap};

    /// A [`ResourceCache`] backed by hash maps.
    #[derive(Debug, Default)]
    pub struct MockResourceCache {
        selectors: RwLock<HashMap<String, Arc<Selector>>>,
        namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
        unavailable: RwLock<Option<String>>,
    }

    impl MockResourceCache {
        /// Create an empty cache.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Insert or replace a Selector, keyed by name.
        pub fn insert_selector(&self, selector: Selector) {
            self.selectors
                .write()
                .insert(selector.name_any(), Arc::new(selector));
        }

        /// Remove a Selector by name.
        pub fn remove_selector(&self, name: &str) {
            self.selectors.write().remove(name);
        }

        /// Insert a Namespace with the given labels.
        pub fn insert_namespace(&self, name: &str, labels: &[(&str, &str)]) {
            let labels: BTreeMap<String, String> = labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect();
            let mut namespace = Namespace::default();
            namespace.metadata.name = Some(name.to_string());
            namespace.metadata.labels = Some(labels);
            self.namespaces
                .write()
                .insert(name.to_string(), Arc::new(namespace));
        }

        /// Make every Selector listing fail with the given reason.
        pub fn set_unavailable(&self, reason: Option<&str>) {
            *self.unavailable.write() = reason.map(str::to_string);
        }

        /// Number of cached Selectors.
        #[must_use]
        pub fn selector_count(&self) -> usize {
            self.selectors.read().len()
        }
    }

    impl ResourceCache for MockResourceCache {
        fn list_selectors(&self) -> Result<Vec<Arc<Selector>>, LookupError> {
            if let Some(reason) = self.unavailable.read().clone() {
                return Err(LookupError::Unavailable {
                    kind: "Selector",
                    reason,
                });
            }
            Ok(self.selectors.read().values().cloned().collect())
        }

        fn get_namespace(&self, name: &str) -> Result<Arc<Namespace>, LookupError> {
            self.namespaces
                .read()
                .get(name)
                .cloned()
                .ok_or_else(|| LookupError::NamespaceNotFound(name.to_string()))
        }
    }
}
