//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  - Prometheus text format
//!   GET /healthz  - Liveness probe (always 200 if process is running)
//!   GET /readyz   - Readiness probe (200 if storage is reachable)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::encoding::{text::encode, EncodeLabelSet};
use prometheus_client::metrics::{counter::Counter, family::Family};
use prometheus_client::registry::Registry;
use sealdrop_core::ErrorKind;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    outcome: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DirectionLabels {
    direction: &'static str,
}

/// Transfer counters. Only outcomes and byte counts are recorded, never ids.
pub struct Metrics {
    registry: Registry,
    uploads: Family<OutcomeLabels, Counter>,
    downloads: Family<OutcomeLabels, Counter>,
    bytes: Family<DirectionLabels, Counter>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let uploads = Family::<OutcomeLabels, Counter>::default();
        let downloads = Family::<OutcomeLabels, Counter>::default();
        let bytes = Family::<DirectionLabels, Counter>::default();

        registry.register(
            "sealdrop_uploads",
            "Uploads by outcome",
            uploads.clone(),
        );
        registry.register(
            "sealdrop_downloads",
            "Downloads by outcome",
            downloads.clone(),
        );
        registry.register(
            "sealdrop_bytes",
            "Bytes transferred by direction",
            bytes.clone(),
        );

        Self {
            registry,
            uploads,
            downloads,
            bytes,
        }
    }

    /// `Ok(bytes)` received, or the kind of failure
    pub fn record_upload(&self, outcome: Result<u64, ErrorKind>) {
        record(&self.uploads, &self.bytes, "in", outcome);
    }

    /// `Ok(bytes)` sent, or the kind of failure
    pub fn record_download(&self, outcome: Result<u64, ErrorKind>) {
        record(&self.downloads, &self.bytes, "out", outcome);
    }

    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut body = String::new();
        encode(&mut body, &self.registry)?;
        Ok(body)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn record(
    outcomes: &Family<OutcomeLabels, Counter>,
    bytes: &Family<DirectionLabels, Counter>,
    direction: &'static str,
    outcome: Result<u64, ErrorKind>,
) {
    match outcome {
        Ok(n) => {
            outcomes.get_or_create(&OutcomeLabels { outcome: "ok" }).inc();
            bytes.get_or_create(&DirectionLabels { direction }).inc_by(n);
        }
        Err(kind) => {
            outcomes
                .get_or_create(&OutcomeLabels {
                    outcome: kind.as_str(),
                })
                .inc();
        }
    }
}

/// Shared state for the health endpoints
#[derive(Clone)]
pub struct HealthState {
    pub metrics: Arc<Metrics>,
    pub operator: opendal::Operator,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9100")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: returns 200 if storage is reachable, 503 otherwise.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match sealdrop_storage::check_health(&state.operator).await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!("readiness check failed: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unreachable")
        }
    }
}
