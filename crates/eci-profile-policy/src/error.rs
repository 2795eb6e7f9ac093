//! Error types for the policy crate.

use eci_profile_core::SelectorConfigError;
use thiserror::Error;

/// A read against the resource cache failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The namespace is not present in the cache.
    #[error("namespace {0:?} not found")]
    NamespaceNotFound(String),

    /// A cached collection cannot be read.
    #[error("{kind} cache unavailable: {reason}")]
    Unavailable {
        /// Resource kind of the collection.
        kind: &'static str,
        /// Why the read failed.
        reason: String,
    },
}

/// Errors that can occur while resolving a Selector or executing its policy.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Listing Selectors or looking up the namespace failed.
    #[error("failed to match selector: {0}")]
    Lookup(#[from] LookupError),

    /// A Selector carries a malformed label predicate.
    #[error("failed to match selector: {0}")]
    SelectorConfig(#[from] SelectorConfigError),

    /// A patch value could not be encoded.
    #[error("failed to encode patch: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A specialized Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
