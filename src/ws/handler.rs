//! Axum WebSocket upgrade handler.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::response::{IntoResponse, Response};

use super::transport::AxumTransport;
use crate::app_state::AppState;
use crate::error::HubError;

/// `GET {ws_path}` — Upgrade HTTP connection to WebSocket.
///
/// The upgraded socket is handed to [`super::ConnectionRegistry::accept`],
/// which runs until the connection terminates. A failed upgrade never reaches
/// the registry and is answered with a 500 error body.
pub async fn ws_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "websocket upgrade rejected");
            return HubError::UpgradeFailed(rejection.body_text()).into_response();
        }
    };

    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| async move {
        let _ = registry.accept(AxumTransport::new(socket)).await;
    })
}
