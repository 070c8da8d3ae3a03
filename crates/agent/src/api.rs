//! Agent HTTP endpoints: liveness, readiness and Prometheus metrics

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use converge_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::ConvergeMetrics,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ConvergeMetrics,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: ConvergeMetrics) -> Self {
        Self {
            health_registry,
            metrics,
        }
    }
}

fn probe<T: Serialize>(passing: bool, body: T) -> Response {
    let status = if passing {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// Liveness: a degraded agent still converges, only unhealthy fails
async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let health = state.health_registry.health().await;
    let live = health.status != ComponentStatus::Unhealthy;
    probe(live, health)
}

/// Readiness: fails until the first sweep has finished
async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    let readiness = state.health_registry.readiness().await;
    probe(readiness.ready, readiness)
}

/// Text exposition of the process-wide registry
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    match encoder.encode(&prometheus::gather(), &mut buffer) {
        Ok(()) => (
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the agent endpoints on `port` until `shutdown` resolves
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(addr = %listener.local_addr()?, "Agent API listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Agent API stopped");
    Ok(())
}
