//! API error responses

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use sandpit_core::SandboxError;
use sandpit_core::protocol::ErrorResponse;

/// An error that can be turned into an HTTP response
#[derive(Debug)]
pub enum ApiError {
    /// The request was malformed, too large, or named an unknown language
    BadRequest(String),

    /// No execution slot became free in time
    Busy(String),

    /// Anything that went wrong on the host side
    Internal(String),
}

impl From<SandboxError> for ApiError {
    fn from(err: SandboxError) -> Self {
        match err {
            e if e.is_client_error() => Self::BadRequest(e.to_string()),
            e @ SandboxError::Busy => Self::Busy(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest(error) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error,
                    details: None,
                },
            ),
            Self::Busy(error) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error,
                    details: None,
                },
            ),
            Self::Internal(details) => {
                tracing::error!(error = %details, "code execution failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: "Code execution failed".into(),
                        details: Some(details),
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
