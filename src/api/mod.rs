//! HTTP layer: operational endpoints, OpenAPI document, router composition.

pub mod handlers;

use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// OpenAPI description of the HTTP endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "beacon-hub", description = "WebSocket heartbeat and fan-out hub"),
    paths(
        handlers::system::health_handler,
        handlers::system::connections_handler,
    ),
    tags((name = "System", description = "Health and connection introspection"))
)]
pub struct ApiDoc;

/// `GET /api-docs/openapi.json` — OpenAPI document.
async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Builds the router with all operational endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .merge(handlers::system::routes())
        .route("/api-docs/openapi.json", get(openapi_handler))
}

/// Builds the complete application: operational endpoints plus the
/// WebSocket upgrade route at `ws_path`.
pub fn build_app(state: AppState, ws_path: &str) -> Router {
    Router::new()
        .merge(build_router())
        .route(ws_path, get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::api::handlers::system::{ConnectionListResponse, HealthResponse};
    use crate::ws::ConnectionRegistry;

    fn app() -> Router {
        build_app(AppState::new(ConnectionRegistry::new()), "/websocket")
    }

    async fn get_json(uri: &str) -> (StatusCode, serde_json::Value) {
        let Ok(request) = Request::builder().uri(uri).body(Body::empty()) else {
            panic!("request builder failed");
        };
        let Ok(response) = app().oneshot(request).await else {
            panic!("router failed");
        };
        let status = response.status();
        let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body read failed");
        };
        let value = serde_json::from_slice(&bytes).unwrap_or_default();
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_zero_connections() {
        let (status, body) = get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        let Ok(health) = serde_json::from_value::<HealthResponse>(body) else {
            panic!("unexpected health body");
        };
        assert_eq!(health.status, "healthy");
        assert_eq!(health.connections, 0);
    }

    #[tokio::test]
    async fn connections_list_is_empty() {
        let (status, body) = get_json("/connections").await;
        assert_eq!(status, StatusCode::OK);
        let Ok(list) = serde_json::from_value::<ConnectionListResponse>(body) else {
            panic!("unexpected connections body");
        };
        assert_eq!(list.count, 0);
        assert!(list.connections.is_empty());
    }

    #[tokio::test]
    async fn openapi_lists_system_paths() {
        let (status, body) = get_json("/api-docs/openapi.json").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/health"].is_object());
        assert!(body["paths"]["/connections"].is_object());
    }

    #[tokio::test]
    async fn plain_get_on_ws_route_is_rejected_as_upgrade_failure() {
        let (status, body) = get_json("/websocket").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], 3002);
    }
}
