use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::services::{CycleError, UsageError};

/// Message returned for failures whose detail is only logged.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Errors returned by the HTTP API. Every variant renders as
/// `{"success": false, "error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed or out-of-range query parameters.
    Validation(String),
    NotFound(String),
    MethodNotAllowed(String),
    /// The metrics source could not be reached, rejected the request or timed out.
    SourceUnavailable(String),
    /// The cycle day does not exist in the month the window needs.
    InvalidCycleDay(String),
    /// Unexpected failure. The detail is logged, not returned.
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope<'a> {
    pub success: bool,
    pub error: &'a str,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::SourceUnavailable(_)
            | ApiError::InvalidCycleDay(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::Validation(msg)
            | ApiError::NotFound(msg)
            | ApiError::MethodNotAllowed(msg)
            | ApiError::SourceUnavailable(msg)
            | ApiError::InvalidCycleDay(msg) => msg,
            ApiError::Internal(_) => INTERNAL_ERROR_MESSAGE,
        }
    }
}

impl From<UsageError> for ApiError {
    fn from(err: UsageError) -> Self {
        tracing::error!(error = %err, "Usage query failed");
        ApiError::SourceUnavailable(err.to_string())
    }
}

impl From<CycleError> for ApiError {
    fn from(err: CycleError) -> Self {
        match err {
            CycleError::OutOfRange { .. } => ApiError::Validation(err.to_string()),
            CycleError::NotInMonth { .. } => {
                tracing::warn!(error = %err, "Cycle day does not fit the billing month");
                ApiError::InvalidCycleDay(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(error = %detail, "Internal error");
        }

        let status = self.status();
        let body = Json(ErrorEnvelope {
            success: false,
            error: self.message(),
        });
        (status, body).into_response()
    }
}
