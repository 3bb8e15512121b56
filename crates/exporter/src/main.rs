//! Kube TCP Exporter - per-pod TCP connection metrics
//!
//! This binary runs as a DaemonSet on each Kubernetes node, tracking the
//! pods scheduled there and exposing their TCP connection counts by state.

use anyhow::{Context, Result};
use exporter_lib::{
    health::{components, HealthRegistry},
    observability::{ExporterMetrics, PodTcpCollector, StructuredLogger},
    ManagerBuilder,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod lister;

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting kube-tcp-exporter");

    // Load configuration
    let config = config::ExporterConfig::load()?;
    info!(node_name = %config.node_name, "Exporter configured");

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::REFRESHER).await;
    health_registry.register(components::LISTER).await;

    // Register self metrics before the first refresh
    ExporterMetrics::new();

    let logger = StructuredLogger::new(&config.node_name);

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let lister = Arc::new(lister::KubeWorkloadLister::new(client, &config.node_name));

    let manager = Arc::new(
        ManagerBuilder::new()
            .lister(lister)
            .health_registry(health_registry.clone())
            .interval(config.refresh_interval())
            .rootfs(&config.rootfs_path)
            .build()?,
    );

    prometheus::register(Box::new(PodTcpCollector::new(manager.clone())?))
        .context("Failed to register pod collector")?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let refresh_handle = tokio::spawn(manager.clone().run(shutdown_rx));

    logger.log_startup(
        EXPORTER_VERSION,
        &config.rootfs_path.display().to_string(),
        config.refresh_interval_secs,
    );

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(
        health_registry,
        prometheus::default_registry().clone(),
    ));
    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal or API server failure
    let outcome = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            logger.log_shutdown("SIGINT received");
            res.context("Failed to listen for shutdown signal")
        }
        res = &mut api_handle => {
            logger.log_shutdown("API server stopped");
            match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(e.into()),
            }
        }
    };

    let _ = shutdown_tx.send(());
    if let Err(e) = refresh_handle.await {
        error!(error = %e, "Refresh loop task failed");
    }
    api_handle.abort();

    info!("Shutting down");
    outcome
}
