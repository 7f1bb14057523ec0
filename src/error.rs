//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - **DecodeError**: failures of the decoder core (registry, framer, engine,
//!   container writer). Each variant maps to a stable kind code that boundary
//!   results carry in their `error` field.
//! - **AppError**: failures of the non-boundary HTTP routes (config, health),
//!   converted into JSON error responses through actix's `ResponseError`.
//!
//! ## JSON Response Format (AppError):
//! ```json
//! {
//!   "error": {
//!     "type": "validation_error",
//!     "message": "Server port cannot be 0",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Errors produced by the decoder core.
///
/// Argument and lookup errors are raised before any session state is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Bad sample rate, channel count, chunk size or payload.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Identifier was never issued or the session has been destroyed.
    #[error("Session {0} not found")]
    SessionNotFound(u64),

    /// The registry already holds the configured maximum of live sessions.
    #[error("Maximum concurrent sessions ({0}) reached")]
    SessionLimit(usize),

    /// The codec rejected the input or reported corruption.
    #[error("Codec failure: {0}")]
    CodecFailure(String),

    /// File missing or unreadable.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Container could not be persisted.
    #[error("Write failure: {0}")]
    WriteFailure(String),

    /// Caller cancelled a whole-source decode between packets.
    #[error("Decode cancelled after {packets_done} packets")]
    Cancelled { packets_done: usize },

    /// Caller-imposed deadline elapsed.
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),
}

impl DecodeError {
    /// Stable machine-readable code, used as the `error` field of boundary results.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::InvalidArgument(_) => "InvalidArgument",
            DecodeError::SessionNotFound(_) => "SessionNotFound",
            DecodeError::SessionLimit(_) => "SessionLimit",
            DecodeError::CodecFailure(_) => "CodecFailure",
            DecodeError::SourceUnavailable(_) => "SourceUnavailable",
            DecodeError::WriteFailure(_) => "WriteFailure",
            DecodeError::Cancelled { .. } => "Cancelled",
            DecodeError::Timeout(_) => "Timeout",
        }
    }

    /// HTTP status used when a failed boundary result is sent over HTTP.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DecodeError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            DecodeError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            DecodeError::SessionLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            DecodeError::CodecFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DecodeError::SourceUnavailable(_) => StatusCode::NOT_FOUND,
            DecodeError::WriteFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DecodeError::Cancelled { .. } | DecodeError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        DecodeError::InvalidArgument(msg.into())
    }
}

/// Errors for the non-boundary HTTP routes.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    ConfigError(String),
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::ValidationError(msg) => ("validation_error", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// `?` on an anyhow error inside a handler becomes a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_kinds_are_stable() {
        assert_eq!(DecodeError::SessionNotFound(7).kind(), "SessionNotFound");
        assert_eq!(DecodeError::invalid("x").kind(), "InvalidArgument");
        assert_eq!(DecodeError::Cancelled { packets_done: 3 }.kind(), "Cancelled");
        assert_eq!(DecodeError::SessionLimit(2).status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_app_error_response_status() {
        let err = AppError::ValidationError("bad".to_string());
        assert_eq!(err.error_response().status(), StatusCode::BAD_REQUEST);
        let err = AppError::NotFound("gone".to_string());
        assert_eq!(err.error_response().status(), StatusCode::NOT_FOUND);
    }
}
