//! Application Error Types
//!
//! Centralized error taxonomy with Axum integration and the closed set of
//! realtime envelope codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type.
///
/// `Conflict` is internal plumbing: the store raises it on unique-constraint
/// violations and the conversation service converts it into a fetch of the
/// winning row. It never reaches a client envelope.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Closed set of error codes exposed on the realtime envelope.
///
/// The code is stable API surface; the accompanying message is human-readable
/// and may change wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    AccessDenied,
    NotFound,
    Forbidden,
    RateLimited,
    InvalidOperation,
    ServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::RateLimited => "RATE_LIMITED",
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::ServerError => "SERVER_ERROR",
        }
    }
}

impl ChatError {
    /// Map to the envelope code. Total: every variant has a code, and
    /// internal variants collapse to `ServerError` so no storage detail
    /// leaks to clients.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::ValidationError,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::AccessDenied(_) => ErrorCode::AccessDenied,
            Self::InvalidOperation(_) => ErrorCode::InvalidOperation,
            Self::RateLimited => ErrorCode::RateLimited,
            Self::Conflict(_) | Self::Database(_) | Self::Internal(_) => ErrorCode::ServerError,
        }
    }

    /// Client-facing message for the envelope.
    pub fn client_message(&self) -> String {
        match self {
            Self::Conflict(_) | Self::Database(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
            Self::RateLimited => "Rate limited".to_string(),
            other => other.to_string(),
        }
    }
}

/// Error response body for the HTTP surface.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChatError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Forbidden(_) | ChatError::AccessDenied(_) => StatusCode::FORBIDDEN,
            ChatError::InvalidOperation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ChatError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ChatError::Conflict(_) => StatusCode::CONFLICT,
            ChatError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ChatError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ErrorResponse {
            code: self.error_code().as_str(),
            message: self.client_message(),
        };

        (status, Json(body)).into_response()
    }
}
