//! API error handling.
//!
//! Provides consistent error responses for the API and the mapping from
//! engine errors to HTTP statuses. Upstream statuses propagate as-is so a
//! client can tell a dead link (404) from active protection (403).

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use relay_engine::RelayError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Operator-facing suggestion (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn bad_gateway(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            suggestion: self.suggestion,
        };
        (self.status, Json(body)).into_response()
    }
}

const TRY_ANOTHER_SERVER: &str = "try a different server index";

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let message = err.to_string();
        match err {
            RelayError::Upstream { status, .. } => Self::new(status, "UPSTREAM_ERROR", message),
            RelayError::Blocked { .. } => Self::bad_gateway("UPSTREAM_BLOCKED", message)
                .with_suggestion(TRY_ANOTHER_SERVER),
            RelayError::StreamBlocked { .. } => Self::bad_gateway("STREAM_BLOCKED", message)
                .with_suggestion(TRY_ANOTHER_SERVER),
            RelayError::AllServersUnavailable { .. } => {
                Self::bad_gateway("ALL_SERVERS_UNAVAILABLE", message)
                    .with_suggestion(TRY_ANOTHER_SERVER)
            }
            RelayError::IncompleteDownload { .. } => {
                Self::bad_gateway("INCOMPLETE_DOWNLOAD", message)
            }
            RelayError::Playlist { .. } => Self::bad_gateway("BAD_PLAYLIST", message),
            RelayError::Resolver { .. } => Self::bad_gateway("RESOLVER_ERROR", message),
            RelayError::Network { .. } => Self::bad_gateway("UPSTREAM_UNREACHABLE", message),
            RelayError::Timeout { .. } => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT", message)
            }
            RelayError::InvalidUrl { .. } => Self::bad_request(message),
            RelayError::Assembly { .. } | RelayError::Io { .. } => Self::internal(message),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
