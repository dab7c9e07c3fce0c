//! Centralized error types for the streaming playback pipeline.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses on the daemon's health surface

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the playback pipeline.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum TtsError {
    /// Could not reach the synthesis server.
    #[error("Network error: {0}")]
    Network(String),

    /// Synthesis server responded with a non-success status.
    #[error("Synthesis server returned {status}: {body}")]
    Http { status: u16, body: String },

    /// Malformed daemon protocol message or invalid audio format.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Native audio subprocess could not be spawned, or write to it failed.
    #[error("Audio sink error: {0}")]
    Sink(String),

    /// An operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The operation was canceled by the caller; not a failure.
    #[error("Canceled: {0}")]
    Canceled(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TtsError {
    /// True if retrying the operation that produced this error might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Protocol(_) | Self::Sink(_) | Self::Canceled(_) | Self::Internal(_) => false,
        }
    }

    /// A short, user-facing message suitable for surfacing in a host UI.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Sink(_) => "Audio system failed to start",
            Self::Timeout(_) => "Audio playback timed out",
            Self::Protocol(_) => "Audio playback interrupted",
            Self::Network(_) | Self::Http { .. } => "Audio playback interrupted",
            Self::Canceled(_) => "Playback canceled",
            Self::Internal(_) => "An unexpected error occurred",
        }
    }
}

impl ErrorCode for TtsError {
    fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "network_error",
            Self::Http { .. } => "http_error",
            Self::Protocol(_) => "protocol_error",
            Self::Sink(_) => "sink_error",
            Self::Timeout(_) => "timeout",
            Self::Canceled(_) => "canceled",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl TtsError {
    /// Maps the error to an appropriate HTTP status code for the daemon's `/health` surface.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Http { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Network(_) | Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Protocol(_) => StatusCode::BAD_REQUEST,
            Self::Canceled(_) => StatusCode::OK,
            Self::Sink(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type TtsResult<T> = Result<T, TtsError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for TtsError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_5xx_is_transient() {
        let err = TtsError::Http { status: 503, body: "busy".into() };
        assert!(err.is_transient());
    }

    #[test]
    fn http_4xx_other_than_408_429_is_not_transient() {
        let err = TtsError::Http { status: 400, body: "bad".into() };
        assert!(!err.is_transient());
    }

    #[test]
    fn protocol_error_returns_bad_request() {
        let err = TtsError::Protocol("bad frame".into());
        assert_eq!(err.code(), "protocol_error");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn canceled_is_not_transient_and_not_an_error_status() {
        let err = TtsError::Canceled("user stop".into());
        assert!(!err.is_transient());
        assert_eq!(err.status_code(), StatusCode::OK);
    }
}
