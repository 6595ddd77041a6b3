//! Pipeline middleware: rate limiting, request logging, panic recovery.
//!
//! Composition is explicit in `server::build_router`; order outermost
//! first is CORS → authentication → rate limit → (authorization in the
//! dispatcher) → logging → panic recovery → handler.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use moon_common::{redact_pairs, MoonError};
use tracing::{error, info};

use crate::auth::AuthEntity;
use crate::error::ApiError;
use crate::rate_limit::RateDecision;
use crate::state::AppState;

/// Request id attached to the extensions and the `X-Request-Id` header.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

fn apply_rate_headers(response: &mut Response, decision: &RateDecision) {
    let headers = response.headers_mut();
    for (name, value) in decision.headers() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

/// Per-entity token bucket enforcement. Unauthenticated (public) paths
/// pass through untouched.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(entity) = req.extensions().get::<AuthEntity>().cloned() else {
        return next.run(req).await;
    };

    let decision = state.rate_limiter.check(&entity.id, entity.kind);
    if !decision.allowed {
        let retry_after = decision.retry_after.unwrap_or(60);
        let mut response =
            ApiError::new(MoonError::RateLimited { retry_after }).into_response();
        apply_rate_headers(&mut response, &decision);
        return response;
    }

    let mut response = next.run(req).await;
    apply_rate_headers(&mut response, &decision);
    response
}

/// Structured request logging with a fresh request id and redacted query
/// parameters.
pub async fn request_log(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = ulid::Ulid::new().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let query = req.uri().query().unwrap_or("").to_string();
    let logged_query = if state.config.logging.redact_sensitive && !query.is_empty() {
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let redacted = redact_pairs(&pairs, &state.config.logging.additional_sensitive_fields);
        redacted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    } else {
        query
    };

    req.extensions_mut().insert(RequestId(request_id.clone()));
    let started = Instant::now();
    let mut response = next.run(req).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        query = %logged_query,
        status = response.status().as_u16(),
        elapsed_ms,
        "request"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
}

/// Innermost layer: converts handler panics into `500 internal_error`
/// without leaking anything.
pub async fn recover(req: Request, next: Next) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(request_id = %request_id, panic = %message, "handler panicked");
            ApiError::new(MoonError::Internal("handler panicked".into())).into_response()
        }
    }
}
