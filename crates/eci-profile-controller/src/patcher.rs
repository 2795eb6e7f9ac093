//! Writes merge patches to Pods through the cluster API.

use async_trait::async_trait;
use eci_profile_policy::PatchDocument;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use tracing::debug;

use crate::error::{ControllerError, Result};

/// Applies a [`PatchDocument`] to a Pod.
#[async_trait]
pub trait PodPatcher: Send + Sync {
    /// Send `patch` as a JSON Merge Patch against `namespace/name`.
    async fn merge_patch(&self, namespace: &str, name: &str, patch: &PatchDocument) -> Result<()>;
}

/// [`PodPatcher`] backed by a kube client.
#[derive(Clone)]
pub struct KubePodPatcher {
    client: Client,
}

impl KubePodPatcher {
    /// Create a patcher using `client`.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodPatcher for KubePodPatcher {
    async fn merge_patch(&self, namespace: &str, name: &str, patch: &PatchDocument) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|source| ControllerError::Patch {
                pod: format!("{namespace}/{name}"),
                source,
            })?;
        debug!(namespace, name, "merge patch applied");
        Ok(())
    }
}

/// Recording patcher for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A [`PodPatcher`] that records patches in memory.
    #[derive(Default)]
    pub struct MockPodPatcher {
        patches: Mutex<Vec<(String, String, PatchDocument)>>,
        fail: AtomicBool,
    }

    impl MockPodPatcher {
        /// Create a patcher that accepts every patch.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make subsequent patches fail.
        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        /// Every accepted patch as `(namespace, name, document)`.
        #[must_use]
        pub fn patches(&self) -> Vec<(String, String, PatchDocument)> {
            self.patches.lock().clone()
        }

        /// Number of accepted patches.
        #[must_use]
        pub fn patch_count(&self) -> usize {
            self.patches.lock().len()
        }
    }

    #[async_trait]
    impl PodPatcher for MockPodPatcher {
        async fn merge_patch(
            &self,
            namespace: &str,
            name: &str,
            patch: &PatchDocument,
        ) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ControllerError::Patch {
                    pod: format!("{namespace}/{name}"),
                    source: kube::Error::Api(kube::core::ErrorResponse {
                        status: "Failure".to_string(),
                        message: "injected failure".to_string(),
                        reason: "InternalError".to_string(),
                        code: 500,
                    }),
                });
            }
            self.patches
                .lock()
                .push((namespace.to_string(), name.to_string(), patch.clone()));
            Ok(())
        }
    }
}
