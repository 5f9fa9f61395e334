//! HTTP API for health checks, Prometheus metrics and published data

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use opex_lib::health::{ComponentStatus, HealthRegistry};
use prometheus::{Encoder, TextEncoder};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    /// Directory holding the published JSON artifacts
    pub data_dir: PathBuf,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, data_dir: PathBuf) -> Self {
        Self {
            health_registry,
            data_dir,
        }
    }
}

/// 200 while operational (degraded included), 503 when a component failed
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = if health.status == ComponentStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(health))
}

/// 200 once the first sampling cycle completed
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Serve one published artifact
async fn data_file(State(state): State<Arc<AppState>>, Path(file): Path<String>) -> Response {
    if file.starts_with('.') || file.contains(['/', '\\']) || !file.ends_with(".json") {
        return StatusCode::NOT_FOUND.into_response();
    }

    match tokio::fs::read(state.data_dir.join(&file)).await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            debug!(file = %file, error = %e, "Artifact not available");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/data/:file", get(data_file))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
