//! Outgest API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// Outgest API error type.
///
/// The outgest path returns either a full valid stream or one well-formed
/// error class: client mistakes are unprocessable, everything internal is
/// service-unavailable.
#[derive(Debug, thiserror::Error)]
pub enum OutgestError {
    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("invalid public key: {0}")]
    InvalidKey(String),

    #[error("invalid byte range: {0}")]
    InvalidRange(String),

    #[error("unable to process request")]
    Unavailable,
}

impl OutgestError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidKey(_) => "invalid_key",
            Self::InvalidRange(_) => "invalid_range",
            Self::Unavailable => "unavailable",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingField(_) | Self::InvalidKey(_) | Self::InvalidRange(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for OutgestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for outgest handlers.
pub type OutgestResult<T> = std::result::Result<T, OutgestError>;
