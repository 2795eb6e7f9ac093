//! Error types for the controller crate.

use eci_profile_policy::PolicyError;
use thiserror::Error;

/// Errors that can occur while syncing caches or reconciling Pods.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// Merge-patching a Pod failed.
    #[error("failed to patch pod {pod}: {source}")]
    Patch {
        /// `namespace/name` of the Pod.
        pod: String,
        /// The API error.
        #[source]
        source: kube::Error,
    },

    /// Resolving the Selector or running its policy failed.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// An informer stopped before its cache became ready.
    #[error("{0} cache stopped before initial sync")]
    CacheSync(&'static str),
}

impl ControllerError {
    /// Check if this error is retriable.
    ///
    /// Nothing in this crate retries on its own; the next informer delivery is
    /// the retry.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::KubeApi(_) | Self::Patch { .. })
    }
}

/// A specialized Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;
