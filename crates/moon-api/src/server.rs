//! Server assembly and lifecycle.
//!
//! Middleware composition is explicit, outermost first: CORS →
//! authentication → rate limit → (authorization in the dispatcher) →
//! logging → panic recovery → handler. Shutdown listens for SIGINT and
//! SIGTERM, drains in-flight requests up to the configured timeout, and
//! reports a non-zero exit code when draining had to be cut short.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{any, get};
use axum::Router;
use moon_common::{MoonError, Result};
use tracing::{error, info};

use crate::auth::middleware::authenticate;
use crate::cors::cors_middleware;
use crate::handlers::doc;
use crate::middleware::{rate_limit, recover, request_log};
use crate::router;
use crate::state::AppState;

/// Builds the full application router with the middleware pipeline.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(router::health))
        .route("/doc", get(doc::index))
        .route("/doc/llms-full.txt", get(doc::llms_full))
        .route("/{entity}", any(router::dispatch))
        .fallback(router::not_found)
        // Layers run outermost-last: recovery sits against the handler,
        // CORS fronts the whole pipeline.
        .layer(from_fn(recover))
        .layer(from_fn_with_state(state.clone(), request_log))
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(from_fn_with_state(state.clone(), authenticate))
        .layer(from_fn_with_state(state.clone(), cors_middleware))
        .with_state(state.clone());

    let prefix = state.config.normalized_prefix();
    if prefix.is_empty() {
        api
    } else {
        Router::new().nest(&prefix, api).fallback(router::not_found)
    }
}

/// Runs the server until SIGINT/SIGTERM; returns the process exit code.
pub async fn serve(state: Arc<AppState>) -> Result<i32> {
    let app = build_router(state.clone());
    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| MoonError::Unavailable(format!("cannot bind {}: {}", addr, e)))?;
    info!(addr = %addr, prefix = %state.config.normalized_prefix(), "moon listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_rx.await.ok();
    });
    let serving = tokio::spawn(async move { server.await });

    shutdown_signal().await;
    info!("shutdown signal received, draining in-flight requests");
    let _ = shutdown_tx.send(());

    let drain = Duration::from_secs(state.config.server.shutdown_timeout);
    let exit_code = match tokio::time::timeout(drain, serving).await {
        Ok(Ok(Ok(()))) => 0,
        Ok(Ok(Err(serve_error))) => {
            error!(error = %serve_error, "server terminated with an error");
            1
        }
        Ok(Err(join_error)) => {
            error!(error = %join_error, "server task failed");
            1
        }
        Err(_) => {
            error!(
                timeout_secs = drain.as_secs(),
                "shutdown timeout exceeded, forcing termination"
            );
            1
        }
    };

    state.db.close().await;
    info!(exit_code, "shutdown complete");
    Ok(exit_code)
}

/// Resolves on SIGINT or SIGTERM; other signals keep default handling.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
