//! Error types for punchlink HTTP handlers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::device::DeviceError;

/// API error type
///
/// Every variant renders as `{"error": message}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("{0}")]
    BadRequest(String),

    /// Missing or expired session (401)
    #[error("{0}")]
    Unauthorized(String),

    /// Device unreachable or protocol failure (500)
    #[error("{0}")]
    Device(#[from] DeviceError),

    /// Backend rejected or was unreachable; carries the status to relay
    #[error("{1}")]
    Upstream(StatusCode, String),

    /// Internal server error (500)
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Device(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(status, _) => *status,
        };

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
