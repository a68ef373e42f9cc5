// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Result type for HTTP handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Error envelope returned by every failing endpoint.
#[derive(Debug, Serialize)]
struct ErrorBody {
    err_no: u16,
    err_msg: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            err_no: self.status.as_u16(),
            err_msg: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<livecap_core::Error> for ApiError {
    fn from(err: livecap_core::Error) -> Self {
        use livecap_core::Error;

        match err {
            Error::NotFound(msg) => Self::not_found(msg),
            Error::AlreadyExists(msg) => Self::conflict(msg),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::VersionConflict => Self::new(
                StatusCode::CONFLICT,
                "config was modified concurrently, please retry",
            ),
            Error::Database(e) => {
                tracing::error!("Database error: {}", e);
                Self::internal("Database error")
            }
            other => {
                tracing::error!("Internal error: {}", other);
                Self::internal("Internal server error")
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {}", err);
        Self::bad_request("Invalid request data format")
    }
}

impl From<serde_yaml::Error> for ApiError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::bad_request(format!("Invalid YAML: {err}"))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal error: {}", err);
        Self::internal("Internal server error")
    }
}
