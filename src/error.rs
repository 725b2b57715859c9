use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    CapabilityError(String),

    #[error("Timed out: {0}")]
    TimeoutError(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Invalid input: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Model inference failed: {0}")]
    ModelError(String),
}

/// Serializable tag for the error taxonomy, carried in invocation envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownOperation,
    MissingArgument,
    InvalidArgument,
    CapabilityError,
    TimeoutError,
    RouteNotFound,
    IndexUnavailable,
    ValidationError,
    StorageError,
    ModelError,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::UnknownOperation(_) => ErrorKind::UnknownOperation,
            AppError::MissingArgument(_) => ErrorKind::MissingArgument,
            AppError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            AppError::CapabilityError(_) => ErrorKind::CapabilityError,
            AppError::TimeoutError(_) => ErrorKind::TimeoutError,
            AppError::RouteNotFound(_) => ErrorKind::RouteNotFound,
            AppError::IndexUnavailable(_) => ErrorKind::IndexUnavailable,
            AppError::ValidationError(_) => ErrorKind::ValidationError,
            AppError::StorageError(_) => ErrorKind::StorageError,
            AppError::ModelError(_) => ErrorKind::ModelError,
        }
    }

    /// Shorthand used by capabilities to wrap collaborator failures.
    pub fn capability(message: impl std::fmt::Display) -> Self {
        AppError::CapabilityError(message.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::MissingArgument(_)
            | AppError::InvalidArgument(_)
            | AppError::ValidationError(_) => {
                tracing::warn!(error = %self, "Validation error");
                StatusCode::BAD_REQUEST
            }
            AppError::UnknownOperation(_) | AppError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            AppError::IndexUnavailable(_) => {
                tracing::warn!(error = %self, "Index unavailable");
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::TimeoutError(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::CapabilityError(_) | AppError::StorageError(_) | AppError::ModelError(_) => {
                tracing::error!(error = %self, "Internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

impl From<ort::Error> for AppError {
    fn from(err: ort::Error) -> Self {
        AppError::ModelError(err.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::StorageError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::CapabilityError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::CapabilityError(format!("HTTP error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidArgument(format!("Malformed JSON: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
