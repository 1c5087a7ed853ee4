//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Validation(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Any failure on the synchronous generation path.
    #[error("Error generating video: {0}")]
    Generation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vgen_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] vgen_queue::QueueError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn generation(cause: impl std::fmt::Display) -> Self {
        Self::Generation(cause.to_string())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Generation(_) | ApiError::Internal(_) | ApiError::Storage(_) | ApiError::Queue(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<vgen_models::RequestError> for ApiError {
    fn from(e: vgen_models::RequestError) -> Self {
        Self::Validation(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

/// Response extension marking a body whose detail may leak internals.
/// [`crate::middleware::redact_internal_errors`] replaces it in production.
#[derive(Debug, Clone, Copy)]
pub struct InternalDetail;

/// Detail shown instead of an internal error message in production.
pub const REDACTED_DETAIL: &str = "An internal error occurred";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let hide = matches!(
            self,
            ApiError::Internal(_) | ApiError::Storage(_) | ApiError::Queue(_)
        );

        let mut response = (status, Json(ErrorResponse { detail: self.to_string() })).into_response();
        if hide {
            response.extensions_mut().insert(InternalDetail);
        }
        response
    }
}
