//! Kubernetes client construction.

use std::time::Duration;

use kube::client::ClientBuilder;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tower::limit::RateLimitLayer;
use tracing::info;

use crate::config::Args;
use crate::error::{BootstrapError, Result};

/// Resolve client configuration from flags.
///
/// An explicit `--kubeconfig` wins, otherwise the in-cluster or default
/// kubeconfig is inferred. `--master` then overrides the API server URL.
///
/// # Errors
///
/// Fails if no configuration can be loaded or `--master` is not a URL.
pub async fn kube_config(args: &Args) -> Result<Config> {
    let mut config = match &args.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                BootstrapError::ClientConfig(format!("read kubeconfig {}: {e}", path.display()))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| BootstrapError::ClientConfig(e.to_string()))?
        }
        None => Config::infer()
            .await
            .map_err(|e| BootstrapError::ClientConfig(e.to_string()))?,
    };

    if let Some(master) = &args.master {
        config.cluster_url = master
            .parse()
            .map_err(|e| BootstrapError::ClientConfig(format!("invalid --master {master}: {e}")))?;
    }

    info!(cluster_url = %config.cluster_url, "loaded client configuration");
    Ok(config)
}

/// Window in which `burst` requests may be sent to average `qps`.
///
/// # Errors
///
/// Fails unless `qps` is positive and finite and `burst` is non-zero.
#[allow(clippy::cast_precision_loss)]
pub fn rate_limit_window(qps: f64, burst: u64) -> Result<Duration> {
    if !(qps.is_finite() && qps > 0.0) || burst == 0 {
        return Err(BootstrapError::ClientConfig(format!(
            "client rate limit needs qps > 0 and burst > 0, got qps={qps} burst={burst}"
        )));
    }
    Ok(Duration::from_secs_f64(burst as f64 / qps))
}

/// Build a client that sends at most `burst` requests per `burst / qps`
/// seconds.
///
/// # Errors
///
/// Fails if the rate limit is invalid or the client cannot be constructed.
pub fn build_client(config: Config, qps: f64, burst: u64) -> Result<Client> {
    let layer = RateLimitLayer::new(burst, rate_limit_window(qps, burst)?);
    let client = ClientBuilder::try_from(config)?.with_layer(&layer).build();
    info!(qps, burst, "kubernetes client ready");
    Ok(client)
}
