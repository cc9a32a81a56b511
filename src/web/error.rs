//! Control-plane failure responses.
//!
//! Every failed operation answers `{ "error": <message> }`, 4xx for input
//! problems and 5xx for internal failures. The ops CLI keys its exit codes
//! (2 vs 1) off that status split, so the mapping lives in one place.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// A failed control-plane operation.
#[derive(Debug)]
pub enum OpError {
    /// Malformed request input; the caller can fix and retry.
    Invalid(String),
    /// The operation itself failed. The underlying error is logged at
    /// construction; the client only learns which operation broke.
    Internal { op: &'static str },
}

impl OpError {
    pub fn invalid(message: impl Into<String>) -> Self {
        OpError::Invalid(message.into())
    }

    /// Log the underlying failure and keep only the operation name for the
    /// response body.
    pub fn internal(op: &'static str, error: impl std::fmt::Display) -> Self {
        tracing::error!(error = %error, op, "control-plane operation failed");
        OpError::Internal { op }
    }
}

impl IntoResponse for OpError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            OpError::Invalid(message) => (StatusCode::BAD_REQUEST, message),
            OpError::Internal { op } => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{op} failed"))
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
