//! Resource cache and unschedulable-Pod reconciler for eci-profile.
//!
//! This crate provides:
//!
//! - [`KubeResourceCache`]: reflector-backed views of Pods, Nodes, Namespaces,
//!   ResourceQuotas and Selectors, with a startup sync barrier and a periodic
//!   resync
//! - [`ResourceEventHandler`]: explicit per-kind event handlers
//! - [`UnscheduledReconciler`]: re-patches Pods the scheduler marked unschedulable
//! - [`SelectorAuditHandler`]: logs Selector changes
//!
//! # Architecture
//!
//! ```text
//!   watch(Pod) ──► store ──► UnscheduledReconciler ──► PolicyEngine ──► PATCH pod
//!   watch(Selector) ──► store ──► SelectorAuditHandler
//!   watch(Namespace|Node|ResourceQuota) ──► store
//!                        ▲
//!                        └── PolicyEngine reads Selectors and Namespaces
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use eci_profile_controller::{
//!     KubePodPatcher, KubeResourceCache, SelectorAuditHandler, UnscheduledReconciler,
//! };
//! use eci_profile_policy::{PolicyEngine, ResourceCache};
//!
//! # async fn example(client: kube::Client) -> Result<(), Box<dyn std::error::Error>> {
//! let (cache, builder) = KubeResourceCache::new();
//!
//! let shared: Arc<dyn ResourceCache> = cache.clone();
//! let reconciler = UnscheduledReconciler::new(
//!     PolicyEngine::new(shared),
//!     Arc::new(KubePodPatcher::new(client.clone())),
//! );
//!
//! let _informers = builder
//!     .on_pods(Arc::new(reconciler))
//!     .on_selectors(Arc::new(SelectorAuditHandler::new()))
//!     .start(&client);
//!
//! // Nothing should read the cache before this returns.
//! cache.wait_for_cache_sync().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod cache;
pub mod error;
pub mod patcher;
pub mod reconciler;

pub use audit::SelectorAuditHandler;
pub use cache::{
    CacheBuilder, CachedResource, Informer, Informers, KubeResourceCache, ResourceEventHandler,
    DEFAULT_RESYNC_PERIOD,
};
pub use error::{ControllerError, Result};
pub use patcher::{KubePodPatcher, PodPatcher};
pub use reconciler::{is_unscheduled, UnscheduledReconciler};

#[cfg(any(test, feature = "test-utils"))]
pub use patcher::mock::MockPodPatcher;
