//! Core types for eci-profile.
//!
//! This crate provides the foundational pieces shared by the webhook and the
//! controller:
//!
//! - **Selector**: the cluster-scoped custom resource that maps Pods to a
//!   scheduling policy, with priority and side effects
//! - **Label predicates**: compiled `LabelSelector`s with API-server-equivalent
//!   validation
//! - **Error types**: [`SelectorConfigError`] for malformed predicates
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use eci_profile_core::{Selector, SelectorSpec};
//! use k8s_openapi::api::core::v1::Pod;
//!
//! let selector = Selector::new("catch-all", SelectorSpec::default());
//! assert!(selector.matches(&Pod::default(), &BTreeMap::new()).unwrap());
//! assert_eq!(selector.spec.priority(), 0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod labels;
pub mod selector;

pub use error::{LabelAxis, PredicateError, SelectorConfigError};
pub use labels::LabelPredicate;
pub use selector::{
    FairPolicy, NamespaceResourceLimitPolicy, NormalNodeOnlyPolicy, NormalNodePreferPolicy,
    PolicySource, Selector, SelectorSpec, SideEffect, VirtualNodeOnlyPolicy,
};
