//! System endpoints: health check and live connection listing.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::app_state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Always `"healthy"` while the server answers.
    pub status: String,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
    /// Crate version.
    pub version: String,
    /// Number of registered WebSocket connections.
    pub connections: usize,
}

/// `GET /health` — Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, current timestamp and the number of live WebSocket connections.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            connections: state.registry.len().await,
        }),
    )
}

/// Live connection listing.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionListResponse {
    /// Number of registered connections.
    pub count: usize,
    /// Connection ids (UUID v4).
    pub connections: Vec<String>,
}

/// `GET /connections` — List live WebSocket connections.
#[utoipa::path(
    get,
    path = "/connections",
    tag = "System",
    summary = "List live connections",
    description = "Returns the ids of all WebSocket connections currently tracked by the registry.",
    responses(
        (status = 200, description = "Live connections", body = ConnectionListResponse),
    )
)]
pub async fn connections_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut connections: Vec<String> = state
        .registry
        .connection_ids()
        .await
        .iter()
        .map(ToString::to_string)
        .collect();
    connections.sort();
    (
        StatusCode::OK,
        Json(ConnectionListResponse {
            count: connections.len(),
            connections,
        }),
    )
}

/// System routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/connections", get(connections_handler))
}
