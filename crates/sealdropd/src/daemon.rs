//! Daemon lifecycle: storage, transfer engine, metrics and the HTTP API

use anyhow::{Context, Result};
use sealdrop_core::config::SealdropConfig;
use sealdrop_storage::BlobStore;
use sealdrop_transfer::{MemoryRegistry, Transfer, TransferOptions};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::metrics::{HealthState, Metrics};
use crate::server::AppState;

pub async fn run(config: SealdropConfig) -> Result<()> {
    info!(backend = ?config.storage.backend, "daemon starting");

    // Build storage operator and verify connectivity
    let operator = sealdrop_storage::build_operator(&config.storage)?;
    match sealdrop_storage::check_health(&operator).await {
        Ok(()) => info!(backend = ?config.storage.backend, "storage: connected"),
        // Keep the operator; /readyz reports until the backend comes up
        Err(e) => warn!(backend = ?config.storage.backend, "storage: {e}"),
    }

    let store = BlobStore::new(operator.clone(), &config.storage.prefix);
    let transfer = Transfer::new(store, MemoryRegistry::new(), TransferOptions::from(&config))?;
    let metrics = Arc::new(Metrics::new());

    let health = HealthState {
        metrics: metrics.clone(),
        operator,
    };

    let state = Arc::new(AppState {
        transfer,
        metrics,
        public_url: config
            .daemon
            .public_url
            .as_ref()
            .map(|u| u.trim_end_matches('/').to_string()),
    });

    // Health endpoints live on the metrics listener when one is configured
    let app = match config.daemon.metrics_addr.clone() {
        Some(addr) => {
            tokio::spawn(async move {
                if let Err(e) = crate::metrics::serve(addr, health).await {
                    error!("metrics server failed: {e}");
                }
            });
            crate::server::router(state)
        }
        None => crate::server::router(state).merge(crate::metrics::router(health)),
    };

    let listener = tokio::net::TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("api bind {}", config.daemon.listen))?;

    info!(addr = %config.daemon.listen, "api: listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("api server")?;

    info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
