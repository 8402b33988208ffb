//! beacon-hub server entry point.
//!
//! Starts the Axum HTTP server with the WebSocket endpoint and the
//! operational routes.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use beacon_hub::api;
use beacon_hub::app_state::AppState;
use beacon_hub::config::{HubConfig, LogFormat};
use beacon_hub::ws::ConnectionRegistry;

/// How long shutdown waits for connections to send their close frames.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = HubConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    // Build registry
    let registry = ConnectionRegistry::from_config(&config);
    let heartbeat = registry.heartbeat();
    tracing::info!(
        addr = %config.listen_addr,
        ws_path = %config.ws_path,
        ping_ms = heartbeat.ping_period.as_millis(),
        pong_ms = heartbeat.pong_period.as_millis(),
        mode = ?registry.mode(),
        "starting beacon-hub"
    );

    let app_state = AppState::new(registry);
    let registry = Arc::clone(&app_state.registry);

    // Build router
    let app = api::build_app(app_state, &config.ws_path);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    let signal_registry = Arc::clone(&registry);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
                return;
            }
            let closing = signal_registry.shutdown().await;
            tracing::info!(closing, "shutdown signal received");
        })
        .await?;

    // Upgraded sockets run outside the server; let them finish closing.
    if tokio::time::timeout(DRAIN_TIMEOUT, registry.drained())
        .await
        .is_err()
    {
        tracing::warn!(
            remaining = registry.len().await,
            "connections still open after drain timeout"
        );
    }
    tracing::info!("server stopped");

    Ok(())
}
