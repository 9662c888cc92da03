// src/error.rs

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::store::StoreError;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request (missing or malformed fields)
    BadRequest(String),

    // 401 Unauthorized (no session, or credential re-verification rejected)
    AuthError(String),

    // 403 Forbidden (authenticated, but not allowed to touch the resource)
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., duplicate email, double submit)
    Conflict(String),

    // 423 Locked (re-verification disabled until support resets it)
    Locked(String),

    // 429 Too Many Requests (re-verification throttled)
    TooManyRequests { message: String, retry_after_secs: i64 },

    // 503 Service Unavailable (document store unreachable)
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut retry_after = None;
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Locked(msg) => (StatusCode::LOCKED, msg),
            AppError::TooManyRequests {
                message,
                retry_after_secs,
            } => {
                retry_after = Some(retry_after_secs);
                (StatusCode::TOO_MANY_REQUESTS, message)
            }
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Store unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable".to_string(),
                )
            }
        };

        let body = match retry_after {
            Some(secs) => Json(json!({ "error": error_message, "retryAfterSecs": secs })),
            None => Json(json!({ "error": error_message })),
        };

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Converts store failures into their HTTP counterparts.
/// Allows using `?` operator on document store calls.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => {
                AppError::NotFound(format!("No document '{}' in '{}'", id, collection))
            }
            StoreError::AlreadyExists { collection, id } => {
                AppError::Conflict(format!("Document '{}' already exists in '{}'", id, collection))
            }
            StoreError::Conflict { collection, id } => AppError::Conflict(format!(
                "Document '{}' in '{}' was modified concurrently",
                id, collection
            )),
            StoreError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
            StoreError::Serialization(e) => AppError::InternalServerError(e.to_string()),
            StoreError::Backend(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
