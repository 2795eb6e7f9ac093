//! Mutating admission webhook for eci-profile.
//!
//! This crate is the Pod-facing surface of the service. It handles:
//!
//! - AdmissionReview v1 and v1beta1 on `POST /inject`
//! - liveness on `GET /healthz`
//! - serving certificates issued from an operator-provided CA
//! - idempotent MutatingWebhookConfiguration registration
//! - client construction with a client-side rate limit
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      kube-apiserver                          │
//! │           (CREATE pods, failurePolicy=Ignore, 5s)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ HTTPS
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    eci-profile-webhook                       │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐   │
//! │  │   Router    │ │ Admission   │ │  Issuer +           │   │
//! │  │  + Handlers │ │ v1/v1beta1  │ │  Registrar          │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                  ┌────────────────────────┐
//!                  │ PolicyEngine           │
//!                  │ (Selectors, Namespaces │
//!                  │  from the cache)       │
//!                  └────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use eci_profile_controller::KubeResourceCache;
//! use eci_profile_policy::{PolicyEngine, ResourceCache};
//! use eci_profile_webhook::{create_router, WebhookConfig, WebhookState};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (cache, _builder) = KubeResourceCache::new();
//! let shared: Arc<dyn ResourceCache> = cache;
//!
//! let state = WebhookState::new(PolicyEngine::new(shared), WebhookConfig::default());
//! let app = create_router(state);
//!
//! // Plain HTTP for local testing; the binary serves TLS.
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8443").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod admission;
pub mod cert;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod registration;
pub mod routes;
pub mod state;

pub use admission::{Review, ReviewVersion};
pub use cert::{Issuer, ServingCertificate};
pub use client::{build_client, kube_config};
pub use config::{Args, WebhookConfig};
pub use error::{ApiError, BootstrapError};
pub use registration::{AdmissionApi, WebhookRegistrar};
pub use routes::create_router;
pub use state::WebhookState;
