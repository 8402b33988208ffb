//! Hub error types with HTTP status code mapping.
//!
//! [`HubError`] is the central error type for the hub. Connection-level
//! failures never cross connections; the HTTP mapping is only used for
//! request-level failures such as a rejected WebSocket upgrade.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::ConnectionId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 3002,
///     "message": "websocket upgrade failed: Connection header did not include 'upgrade'",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Hub error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                |
/// |-----------|-----------------|----------------------------|
/// | 1000–1999 | Protocol        | 400 Bad Request            |
/// | 2000–2999 | Connection      | 410 Gone / 503 Unavailable |
/// | 3000–3999 | Server          | 500 Internal Server Error  |
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Envelope could not be serialized for forwarding.
    #[error("failed to encode envelope: {0}")]
    Encode(String),

    /// The connection is shutting down or already gone.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// The outbound queue stayed full for longer than the send timeout.
    #[error("timed out enqueueing message for connection {0}")]
    SendTimeout(ConnectionId),

    /// The HTTP request could not be upgraded to a WebSocket.
    #[error("websocket upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HubError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Encode(_) => 1002,
            Self::ConnectionClosed(_) => 2001,
            Self::SendTimeout(_) => 2002,
            Self::Config(_) => 3001,
            Self::UpgradeFailed(_) => 3002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Encode(_) => StatusCode::BAD_REQUEST,
            Self::ConnectionClosed(_) => StatusCode::GONE,
            Self::SendTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpgradeFailed(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_failure_is_internal_error() {
        let err = HubError::UpgradeFailed("missing upgrade header".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), 3002);
        assert!(err.to_string().contains("missing upgrade header"));
    }

    #[test]
    fn closed_connection_maps_to_gone() {
        let err = HubError::ConnectionClosed(ConnectionId::new());
        assert_eq!(err.status_code(), StatusCode::GONE);
        assert_eq!(err.error_code(), 2001);
    }

    #[test]
    fn into_response_carries_status() {
        let response = HubError::Config("bad mode".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn full_queue_maps_to_unavailable() {
        let err = HubError::SendTimeout(ConnectionId::new());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_code(), 2002);
    }
}
