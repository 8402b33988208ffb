//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::ws::ConnectionRegistry;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Registry of live WebSocket connections.
    pub registry: Arc<ConnectionRegistry>,
}

impl AppState {
    /// Wraps a fully configured registry.
    #[must_use]
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}
