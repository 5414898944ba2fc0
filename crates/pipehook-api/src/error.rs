//! API error handling.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::services::router::RouterError;

/// API error type. Rendered as a plain-text body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, message).into_response()
    }
}

impl From<RouterError> for ApiError {
    fn from(err: RouterError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<pipehook_core::event::WebhookError> for ApiError {
    fn from(err: pipehook_core::event::WebhookError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}
