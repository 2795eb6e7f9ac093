//! Webhook configuration types.
//!
//! [`Args`] carries the process flags; [`WebhookConfig`] describes how the
//! webhook is exposed inside the cluster and how requests are bounded.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

/// Command-line flags for the `eci-profile` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "eci-profile")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a kubeconfig. Only required if out-of-cluster.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Address of the Kubernetes API server. Overrides any value in kubeconfig.
    #[arg(long, env = "ECI_PROFILE_MASTER")]
    pub master: Option<String>,

    /// Path to the CA certificate in PEM format.
    #[arg(long, env = "ECI_PROFILE_CACERT")]
    pub cacert: Option<PathBuf>,

    /// Path to the CA private key in PEM format.
    #[arg(long, env = "ECI_PROFILE_CAKEY")]
    pub cakey: Option<PathBuf>,

    /// Maximum queries per second sent to the API server.
    #[arg(long, default_value_t = 500.0)]
    pub client_qps: f64,

    /// Maximum burst of queries sent to the API server.
    #[arg(long, default_value_t = 1000)]
    pub client_burst: u64,

    /// Address the HTTPS listener binds to.
    #[arg(long, env = "ECI_PROFILE_LISTEN_ADDR", default_value = "0.0.0.0:443")]
    pub listen_addr: String,
}

/// In-cluster exposure and request limits for the admission webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Service name fronting the webhook. Also the certificate common name.
    #[serde(default = "WebhookConfig::default_service")]
    pub service: String,

    /// Namespace of the fronting Service.
    #[serde(default = "WebhookConfig::default_namespace")]
    pub namespace: String,

    /// HTTP path of the mutation endpoint.
    #[serde(default = "WebhookConfig::default_path")]
    pub path: String,

    /// Service port the API server dials.
    #[serde(default = "WebhookConfig::default_port")]
    pub port: i32,

    /// Maximum request body size in bytes.
    #[serde(default = "WebhookConfig::default_max_body")]
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    #[serde(default = "WebhookConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// How long in-flight admissions may drain on shutdown, in seconds.
    #[serde(default = "WebhookConfig::default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl WebhookConfig {
    fn default_service() -> String {
        "eci-profile".to_string()
    }

    fn default_namespace() -> String {
        "kube-system".to_string()
    }

    fn default_path() -> String {
        "/inject".to_string()
    }

    const fn default_port() -> i32 {
        443
    }

    const fn default_max_body() -> usize {
        3 * 1024 * 1024 // API server caps admission payloads at 3 MB
    }

    const fn default_request_timeout() -> u64 {
        5
    }

    const fn default_shutdown_grace() -> u64 {
        5
    }

    /// DNS names the serving certificate must cover.
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        vec![
            self.service.clone(),
            format!("{}.{}", self.service, self.namespace),
            format!("{}.{}.svc", self.service, self.namespace),
        ]
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Get the shutdown drain window as a `Duration`.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            service: Self::default_service(),
            namespace: Self::default_namespace(),
            path: Self::default_path(),
            port: Self::default_port(),
            max_body_bytes: Self::default_max_body(),
            request_timeout_seconds: Self::default_request_timeout(),
            shutdown_grace_seconds: Self::default_shutdown_grace(),
        }
    }
}
