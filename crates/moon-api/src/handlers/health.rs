//! Health endpoint.
//!
//! Always HTTP 200; the payload carries liveness. Internal diagnostics
//! (consistency status, driver errors) go to the log, never the wire.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::Response;
use serde_json::json;
use tracing::warn;

use crate::error::{json_response, ApiResult};
use crate::state::AppState;

const PING_DEADLINE: Duration = Duration::from_secs(5);

/// `{major}.{minor}` of the crate version.
fn short_version() -> String {
    let full = env!("CARGO_PKG_VERSION");
    let mut parts = full.split('.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => format!("{}.{}", major, minor),
        _ => full.to_string(),
    }
}

/// `GET /health`.
pub async fn handle(state: &AppState) -> ApiResult<Response> {
    let status = match state.db.ping(PING_DEADLINE).await {
        Ok(()) => "live",
        Err(error) => {
            warn!(error = %error, "health: database unreachable");
            "down"
        }
    };
    let body = json!({
        "status": status,
        "name": "moon",
        "version": short_version(),
    });
    Ok(json_response(StatusCode::OK, &body))
}
