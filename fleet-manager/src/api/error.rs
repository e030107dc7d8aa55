//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::config::ConfigError;
use crate::scheduler::QueueError;
use crate::service::ControlError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),

    /// Retryable; the registration queue is full or gone
    ServiceUnavailable(String),

    /// The runner was saved but its registration job was refused
    RegistrationNotQueued {
        message: String,
        name: String,
        install_dir: String,
    },

    /// A lifecycle operation hit its deadline
    Timeout(String),

    ConfigError(ConfigError),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::RegistrationNotQueued {
                message,
                name,
                install_dir,
            } => {
                tracing::warn!("Registration of {} not queued: {}", name, message);
                let body = serde_json::json!({
                    "error": message,
                    "name": name,
                    "install_dir": install_dir,
                });
                return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
            }
            ApiError::Timeout(msg) => {
                tracing::warn!("Operation timed out: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, msg)
            }
            ApiError::ConfigError(ConfigError::Invalid(msg)) => (StatusCode::BAD_REQUEST, msg),
            ApiError::ConfigError(err) => {
                tracing::error!("Config error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::ConfigError(err)
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::ServiceUnavailable(err.to_string())
    }
}

impl ApiError {
    /// Wraps a failed lifecycle operation, keeping timeouts distinguishable
    pub fn control(action: &str, err: ControlError) -> Self {
        let message = format!("failed to {} runner: {}", action, err);
        if err.is_timeout() {
            ApiError::Timeout(message)
        } else {
            ApiError::InternalError(message)
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
