//! HTTP error rendering.
//!
//! `ApiError` carries a `MoonError` plus optional structured field errors
//! and renders the wire envelope. Handlers return `ApiResult<Response>`
//! and let `?` do the mapping.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use moon_common::{FieldError, MoonError};
use tracing::error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// A request-level error with optional per-field details.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub error: MoonError,
    pub details: Vec<FieldError>,
}

impl ApiError {
    pub fn new(error: MoonError) -> Self {
        Self { error, details: Vec::new() }
    }

    pub fn with_details(error: MoonError, details: Vec<FieldError>) -> Self {
        Self { error, details }
    }

    /// Wraps a batch of field errors as one validation failure.
    pub fn validation(details: Vec<FieldError>) -> Self {
        let summary = match details.len() {
            1 => details[0].to_string(),
            n => format!("{} fields failed validation", n),
        };
        Self::with_details(MoonError::Validation(summary), details)
    }
}

impl From<MoonError> for ApiError {
    fn from(error: MoonError) -> Self {
        Self::new(error)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Internal details go to the log, not the client.
        if matches!(self.error, MoonError::Database(_) | MoonError::Internal(_)) {
            error!(error = %self.error, "request failed internally");
        }

        let status =
            StatusCode::from_u16(self.error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = self.error.to_body().with_details(self.details);
        let mut response = json_response(status, &serde_json::json!(body));

        let retry_after = match self.error {
            MoonError::RateLimited { retry_after }
            | MoonError::LoginAttemptsExceeded { retry_after } => Some(retry_after),
            _ => None,
        };
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Serializes a JSON body with the given status.
pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Response {
    let bytes = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        bytes,
    )
        .into_response()
}
