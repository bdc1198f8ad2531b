//! contour-admission-webhook - rejects HTTPProxies that reuse a virtual host
//! already claimed by another HTTPProxy in the same ingress class.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads the configuration file
//! - Starts the health server, cache sweeper and controller
//! - Starts the webhook server once the claim cache is warm

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use contour_admission_webhook::cache::{ConflictCache, run_sweeper};
use contour_admission_webhook::config::Config;
use contour_admission_webhook::controller::context::Context;
use contour_admission_webhook::controller::proxy_api::KubeProxyApi;
use contour_admission_webhook::crd::HTTPProxy;
use contour_admission_webhook::health::{HealthState, run_health_server};
use contour_admission_webhook::{WebhookState, run_controller, run_webhook_server, scoped_api};

/// Default location of the mounted configuration file
const DEFAULT_CONFIG_PATH: &str = "/etc/contour-admission-webhook/config.yaml";

/// Grace period for in-flight requests and reconciliations during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "contour-admission-webhook", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = "CONFIG_FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Only watch HTTPProxies in this namespace (default: all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("contour_admission_webhook=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    let cli = Cli::parse();
    info!(config = %cli.config.display(), "Starting contour-admission-webhook");

    let config = Config::load(&cli.config).inspect_err(|e| {
        error!(error = %e, "Failed to load configuration");
    })?;
    info!(
        ingress_classes = ?config.ingress_classes.iter().collect::<Vec<_>>(),
        entry_ttl_secs = config.cache.entry_ttl.as_secs(),
        cleanup_interval_secs = config.cache.cleanup_interval.as_secs(),
        "Configuration loaded"
    );

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let health_state = Arc::new(HealthState::new());
    let cache = Arc::new(ConflictCache::new(config.cache.entry_ttl));
    let shutdown = CancellationToken::new();

    // Start health server immediately; /readyz stays 503 until the webhook is up
    let mut health_handle = {
        let health_state = health_state.clone();
        let shutdown = shutdown.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port, shutdown).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let sweeper_handle = tokio::spawn(run_sweeper(
        cache.clone(),
        config.cache.cleanup_interval,
        shutdown.clone(),
        Some(health_state.clone()),
    ));

    let ctx = Arc::new(Context::new(
        cache.clone(),
        Arc::new(KubeProxyApi::new(client.clone())),
        config.ingress_classes.clone(),
        config.controller.resync_interval,
        Some(health_state.clone()),
    ));
    let initial_sync = ctx.initial_sync.clone();

    let mut controller_handle = {
        let api = scoped_api::<HTTPProxy>(client, cli.namespace.as_deref());
        tokio::spawn(run_controller(
            api,
            ctx,
            config.controller.workers,
            shutdown.clone(),
        ))
    };

    // The webhook must not answer before the cache reflects the cluster
    info!("Waiting for initial HTTPProxy sync...");
    tokio::select! {
        _ = initial_sync.wait_synced() => {}
        result = &mut controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
            shutdown.cancel();
            return Err("controller stopped before initial sync".into());
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal before initial sync");
            shutdown.cancel();
            return Ok(());
        }
    }

    let webhook_handle = axum_server::Handle::new();
    let mut webhook_task = {
        let state = Arc::new(WebhookState::new(
            cache,
            config.ingress_classes.clone(),
            Some(health_state.clone()),
        ));
        let webhook_config = config.webhook.clone();
        let handle = webhook_handle.clone();
        tokio::spawn(async move {
            if let Err(e) = run_webhook_server(state, &webhook_config, handle).await {
                error!("Webhook server error: {}", e);
            }
        })
    };

    // Ready only once the listener is bound; TLS load failures never bind
    let webhook_listening = tokio::select! {
        addr = webhook_handle.listening() => match addr {
            Some(addr) => {
                info!(%addr, "Webhook listening");
                true
            }
            None => {
                error!("Webhook server failed to bind");
                false
            }
        },
        result = &mut webhook_task => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
            error!("Webhook server stopped before listening");
            false
        }
    };

    if webhook_listening {
        health_state.set_ready(true).await;
        info!("Webhook ready");

        // Wait for any task to complete (or fail), or shutdown signal
        tokio::select! {
            result = &mut controller_handle => {
                if let Err(e) = result {
                    error!("Controller task panicked: {}", e);
                }
            }
            result = &mut webhook_task => {
                if let Err(e) = result {
                    error!("Webhook server task panicked: {}", e);
                }
            }
            result = &mut health_handle => {
                if let Err(e) = result {
                    error!("Health server task panicked: {}", e);
                }
            }
            // Handle graceful shutdown on SIGTERM or SIGINT
            _ = shutdown_signal() => {
                info!("Received shutdown signal, initiating graceful shutdown...");
            }
        }
    }

    // Mark as not ready to stop receiving new admission requests
    health_state.set_ready(false).await;
    info!("Marked webhook as not ready");

    let grace = Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS);
    webhook_handle.graceful_shutdown(Some(grace));
    shutdown.cancel();

    info!(
        "Waiting up to {}s for in-flight requests and reconciliations to complete...",
        SHUTDOWN_GRACE_PERIOD_SECS
    );
    let drain = async {
        for handle in [controller_handle, webhook_task, health_handle, sweeper_handle] {
            if !handle.is_finished() {
                let _ = handle.await;
            }
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!("Shutdown grace period elapsed with tasks still running");
    }

    info!("Webhook stopped");
    if !webhook_listening {
        return Err("webhook server failed to start".into());
    }
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the process cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
