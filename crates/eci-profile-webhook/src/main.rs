//! eci-profile - Pod scheduling profile service for elastic container instances
//!
//! Startup order:
//!
//! 1. Build a rate-limited kube client and query the server version
//! 2. Load the CA (required; `--cacert` and `--cakey`)
//! 3. Start the informers and block until every cache has synced
//! 4. Register the MutatingWebhookConfiguration
//! 5. Issue a serving certificate and listen for admissions over TLS
//!
//! Any failure before the listener is up exits the process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_openssl::OpenSSLConfig;
use axum_server::Handle;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eci_profile_controller::{
    KubePodPatcher, KubeResourceCache, SelectorAuditHandler, UnscheduledReconciler,
};
use eci_profile_policy::{PolicyEngine, ResourceCache};
use eci_profile_webhook::{
    build_client, create_router, kube_config, AdmissionApi, Args, Issuer, WebhookConfig,
    WebhookRegistrar, WebhookState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,eci_profile=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Starting eci-profile");

    let listen_addr: SocketAddr = args.listen_addr.parse()?;
    let config = WebhookConfig::default();

    tracing::info!(
        listen_addr = %listen_addr,
        kubeconfig = ?args.kubeconfig,
        master = ?args.master,
        client_qps = args.client_qps,
        client_burst = args.client_burst,
        "Configuration loaded"
    );

    // Kubernetes client
    let client = build_client(kube_config(&args).await?, args.client_qps, args.client_burst)?;
    let admission_api = AdmissionApi::detect(&client).await?;

    // Certificate authority
    let issuer = Issuer::from_pem_files(args.cacert.as_deref(), args.cakey.as_deref())?;

    // Caches, reconciler and policy engine
    let (cache, builder) = KubeResourceCache::new();
    let shared: Arc<dyn ResourceCache> = cache.clone();
    let engine = PolicyEngine::new(shared);

    let reconciler = UnscheduledReconciler::new(
        engine.clone(),
        Arc::new(KubePodPatcher::new(client.clone())),
    );
    let informers = builder
        .on_pods(Arc::new(reconciler))
        .on_selectors(Arc::new(SelectorAuditHandler::new()))
        .start(&client);
    tracing::info!(informers = informers.len(), "Waiting for caches to sync");
    cache.wait_for_cache_sync().await?;
    tracing::info!("Caches synced");

    // Webhook registration
    WebhookRegistrar::new(client.clone(), config.clone())
        .register(admission_api, issuer.ca_pem())
        .await?;

    // Serving certificate
    let serving = issuer.issue_csr(&config.service, &config.hosts())?;
    let tls = OpenSSLConfig::from_acceptor(Arc::new(serving.acceptor()?));

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone(), config.shutdown_grace()));

    let app = create_router(WebhookState::new(engine, config));
    tracing::info!(listen_addr = %listen_addr, "Starting HTTPS server");
    axum_server::bind_openssl(listen_addr, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    drop(informers);
    tracing::info!("eci-profile stopped");
    Ok(())
}

/// Stop accepting on SIGINT or SIGTERM and drain in-flight admissions.
async fn shutdown_signal(handle: Handle, grace: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!(grace_seconds = grace.as_secs(), "Shutdown signal received, draining");
    handle.graceful_shutdown(Some(grace));
}
