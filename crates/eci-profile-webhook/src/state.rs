//! Webhook application state.
//!
//! This module defines the shared state that is available to all request handlers.

use eci_profile_policy::PolicyEngine;

use crate::config::WebhookConfig;

/// Shared application state for the webhook server.
pub struct WebhookState {
    /// Resolves Selectors and produces admission patches.
    pub engine: PolicyEngine,
    /// Webhook configuration.
    pub config: WebhookConfig,
}

impl WebhookState {
    /// Create a new webhook state.
    #[must_use]
    pub fn new(engine: PolicyEngine, config: WebhookConfig) -> Self {
        Self { engine, config }
    }
}

impl Clone for WebhookState {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            config: self.config.clone(),
        }
    }
}
