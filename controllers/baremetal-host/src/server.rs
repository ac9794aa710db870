//! Metrics and probe endpoints.
//!
//! - `GET /metrics`: Prometheus text exposition of [`ControllerMetrics`]
//! - `GET /healthz`: liveness, always 200 while the process serves requests
//! - `GET /readyz`: 200 once the Ironic API answers, 503 otherwise

use crate::error::ControllerError;
use crate::metrics::ControllerMetrics;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use ironic_client::IronicClientTrait;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct ServerState {
    pub metrics: ControllerMetrics,
    pub ironic: Arc<dyn IronicClientTrait>,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState").finish_non_exhaustive()
    }
}

pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on `addr` until the listener fails.
pub async fn serve(addr: SocketAddr, state: ServerState) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics and probes listening on {}", addr);
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    match state.metrics.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<ServerState>) -> impl IntoResponse {
    match state.ironic.check_available().await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(e) => {
            debug!("Ironic not ready: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, format!("ironic not ready: {}", e))
        }
    }
}
