//! HTTP API: health, readiness, experiment progress and Prometheus metrics

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bench_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::HarnessMetrics,
    pipeline::{StageLedger, TargetProgress},
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Pipeline stage running when the response was built
pub const STAGE_HEADER: &str = "x-wattbench-stage";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: HarnessMetrics,
    /// Stage ledger the running experiment writes through
    pub ledger_path: PathBuf,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: HarnessMetrics,
        ledger_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            ledger_path: ledger_path.into(),
        }
    }
}

/// Body of `/progress`
#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub stage: Option<String>,
    pub baseline_watts: Option<f64>,
    pub baseline_established: bool,
    pub targets: BTreeMap<String, TargetProgress>,
    pub indices_complete: bool,
}

fn with_stage(stage: Option<&str>, response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    if let Some(value) = stage.and_then(|s| HeaderValue::from_str(s).ok()) {
        response.headers_mut().insert(STAGE_HEADER, value);
    }
    response
}

/// 200 while healthy or degraded, 503 once a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let stage = health.stage.clone();
    with_stage(stage.as_deref(), (status_code, Json(health)))
}

/// 200 once the idle baseline is established
async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    let readiness = state.health_registry.readiness().await;
    let stage = state.health_registry.health().await.stage;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    with_stage(stage.as_deref(), (status_code, Json(readiness)))
}

/// Current stage plus the per-target record of finished work
async fn progress(State(state): State<Arc<AppState>>) -> Response {
    let stage = state.health_registry.health().await.stage;
    let path = state.ledger_path.clone();

    let loaded = tokio::task::spawn_blocking(move || StageLedger::load(path)).await;
    let ledger = match loaded {
        Ok(Ok(ledger)) => ledger,
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to read stage ledger");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
        Err(e) => {
            warn!(error = %e, "Ledger read task failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let baseline = ledger.baseline();
    let body = ProgressResponse {
        stage: stage.clone(),
        baseline_watts: baseline.and_then(|b| b.watts),
        baseline_established: baseline.is_some(),
        targets: ledger.targets().clone(),
        indices_complete: ledger.indices_complete(),
    };
    with_stage(stage.as_deref(), Json(body))
}

/// Prometheus text exposition of the global registry
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/progress", get(progress))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{port}");
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
