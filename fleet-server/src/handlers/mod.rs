//! HTTP handlers (§4.6). Split by concern the way the host crate splits
//! `handlers/` into sub-modules; `mod.rs` keeps only the shared `ApiError`
//! type every handler returns.

pub mod auth_handlers;
pub mod commands;
pub mod dashboard;
pub mod fleet;
pub mod ingestion;
pub mod server_resources;
pub mod speedtest;

use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Jaskier Shared Pattern -- error
// ---------------------------------------------------------------------------

/// Centralized API error type for all handlers. Logs full detail
/// server-side, returns sanitized JSON to the client. Variants map onto the
/// §7 error taxonomy (see DESIGN.md for the condition → variant table):
/// `auth_failed` → `Unauthorized`, `decrypt_failed`/`ingest_rejected` →
/// `BadRequest`, `backpressure` → `RateLimited`, `transient_io` → `Internal`.
///
/// Response format:
/// ```json
/// {
///   "error": {
///     "code": "BAD_REQUEST",
///     "message": "Human-readable description",
///     "request_id": "uuid-from-correlation-id"
///   }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not authenticated: {0}")]
    Unauthorized(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),
}

impl ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::RateLimited(_) => "RATE_LIMITED",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Sanitized message safe to return to clients — internal stack traces
    /// never reach agent clients (§7 propagation policy).
    fn sanitized_message(&self) -> String {
        match self {
            ApiError::BadRequest(m) => m.clone(),
            ApiError::NotFound(_) => "Resource not found".to_string(),
            ApiError::Internal(_) => "Internal server error".to_string(),
            ApiError::Unauthorized(_) => "Invalid credentials".to_string(),
            ApiError::Unavailable(m) => m.clone(),
            ApiError::RateLimited(m) => m.clone(),
        }
    }

    fn current_request_id() -> String {
        Uuid::new_v4().to_string()
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let request_id = Self::current_request_id();

        tracing::error!(
            request_id = %request_id,
            code = self.error_code(),
            "API error ({}): {}",
            status.as_u16(),
            self
        );

        let body = json!({
            "error": {
                "code": self.error_code(),
                "message": self.sanitized_message(),
                "request_id": request_id,
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}
