//! Selector resolution and scheduling policies for eci-profile.
//!
//! This crate turns a Pod into mutations:
//!
//! - [`SelectorResolver`] finds the highest-priority [`Selector`] matching a Pod
//! - [`PolicyKind`] maps the Selector's policy to concrete patches
//! - [`PolicyEngine`] combines the two for the admission and reconcile paths
//!
//! Cluster state is read through the [`ResourceCache`] trait so the engine can
//! run against kube reflectors in production and an in-memory cache in tests.
//!
//! # Example
//!
//! ```
//! use eci_profile_core::SelectorSpec;
//! use eci_profile_policy::PolicyKind;
//! use k8s_openapi::api::core::v1::Pod;
//!
//! // No policy set: the Pod is pinned to virtual nodes.
//! let spec = SelectorSpec::default();
//! let policy = PolicyKind::of(&spec);
//! assert_eq!(policy, PolicyKind::VirtualNodeOnly);
//!
//! let patches = policy.on_pod_creating(&spec, &Pod::default()).unwrap();
//! assert!(patches.iter().any(|p| p.path == "/spec/nodeSelector"));
//! ```
//!
//! For tests without a cluster, enable the `test-utils` feature and back the
//! engine with [`MockResourceCache`](cache::mock::MockResourceCache).
//!
//! [`Selector`]: eci_profile_core::Selector

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod engine;
pub mod error;
pub mod executor;
pub mod patch;
pub mod resolver;
pub mod toleration;

pub use cache::ResourceCache;
pub use engine::{pod_ref, PolicyEngine};
pub use error::{LookupError, PolicyError, Result};
pub use executor::PolicyKind;
pub use patch::{PatchDocument, PatchInstruction, PatchMetadata, PatchOp, PatchSpec};
pub use resolver::SelectorResolver;
pub use toleration::{tolerates_virtual_node, virtual_node_toleration};

#[cfg(any(test, feature = "test-utils"))]
pub use cache::mock::MockResourceCache;
