//! # Initialization
//!
//! Operator initialization: rustls setup, tracing, metrics, probe server startup,
//! Kubernetes client and reconciler setup.

use crate::config::SharedControllerConfig;
use crate::constants::{DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::SpinnakerService;
use crate::observability;
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    /// API for SpinnakerService, scoped to the watched namespace
    pub services: Api<SpinnakerService>,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub controller_config: SharedControllerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Install the subscriber; `RUST_LOG` wins over the configured level
fn init_tracing(log_level: &str) {
    let default_directive = format!("spinnaker_operator={}", log_level.to_lowercase());
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .try_init()
    {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

/// Initialize the operator runtime
pub async fn initialize(controller_config: SharedControllerConfig) -> Result<InitializationResult> {
    // Must run before any rustls connection is made
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    let config = controller_config.read().await.clone();
    init_tracing(&config.log_level);
    if !provider_installed {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting Spinnaker operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
    });
    let server_state_clone = server_state.clone();
    let server_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let services: Api<SpinnakerService> = match config.watch_namespace.as_deref() {
        Some(ns) => {
            info!("Watching SpinnakerService resources in namespace {}", ns);
            Api::namespaced(client.clone(), ns)
        }
        None => {
            info!("Watching SpinnakerService resources in all namespaces");
            Api::all(client.clone())
        }
    };

    check_crd_queryable(&services).await?;

    let reconciler = Arc::new(
        Reconciler::new(client.clone(), controller_config.clone())
            .await
            .context("Failed to create reconciler")?,
    );

    info!("Operator initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        services,
        reconciler,
        server_state,
        controller_config,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval = Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Fail early with a readable message when the CRD is not installed
async fn check_crd_queryable(services: &Api<SpinnakerService>) -> Result<()> {
    match services.list(&ListParams::default().limit(1)).await {
        Ok(list) => {
            info!(
                "CRD is queryable, {} SpinnakerService resource(s) on the first page",
                list.items.len()
            );
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 404 => Err(anyhow::anyhow!(
            "SpinnakerService CRD is not installed; apply the output of `crdgen` first"
        )),
        Err(e) => Err(e).context("Failed to list SpinnakerService resources"),
    }
}
