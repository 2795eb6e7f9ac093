//! HTTP request handlers.
//!
//! This module contains the endpoint handlers for the admission webhook.

pub mod health;
pub mod inject;
