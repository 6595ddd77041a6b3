//! Custom-action routing.
//!
//! Paths look like `/{name}:{action}`. The dispatcher parses the pair,
//! applies the endpoint protection matrix (public / authenticated /
//! admin / write-gated), and calls the matching handler with a parsed
//! [`ApiRequest`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use moon_common::MoonError;
use moon_db::AggFunc;
use moon_schema::is_system_table;

use crate::auth::AuthEntity;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{self, ApiRequest};
use crate::state::AppState;

/// Route handler for `/{name}:{action}` paths.
pub async fn dispatch(State(state): State<Arc<AppState>>, req: Request) -> Response {
    match handle(state, req).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

/// Fallback for unroutable paths: same envelope as every other error.
pub async fn not_found(req: Request) -> Response {
    ApiError::new(MoonError::NotFound(format!(
        "no route for '{}'",
        req.uri().path()
    )))
    .into_response()
}

/// `GET /health`.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    match handlers::health::handle(&state).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

async fn handle(state: Arc<AppState>, req: Request) -> ApiResult<Response> {
    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let entity = req.extensions().get::<AuthEntity>().cloned();

    let (parts, body) = req.into_parts();
    let path = state.relative_path(parts.uri.path());
    let query: Vec<(String, String)> = parts
        .uri
        .query()
        .map(|raw| {
            url::form_urlencoded::parse(raw.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default();
    let idempotency_key = parts
        .headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let bytes = axum::body::to_bytes(body, state.limits.max_payload_bytes)
        .await
        .map_err(|_| {
            MoonError::PayloadTooLarge(format!(
                "body exceeds {} bytes",
                state.limits.max_payload_bytes
            ))
        })?;
    state.limits.check_payload_bytes(bytes.len())?;
    let body = if bytes.is_empty() {
        None
    } else {
        Some(serde_json::from_slice(&bytes).map_err(MoonError::from)?)
    };

    let api_req = ApiRequest {
        method: parts.method.clone(),
        query,
        body,
        entity,
        idempotency_key,
        client_ip,
    };

    let segment = path.trim_start_matches('/');
    let Some((name, action)) = segment.split_once(':') else {
        return Err(MoonError::NotFound(format!("no route for '{}'", path)).into());
    };
    if name.is_empty() || action.is_empty() {
        return Err(MoonError::NotFound(format!("no route for '{}'", path)).into());
    }

    route(&state, name, action, &api_req).await
}

async fn route(
    state: &AppState,
    name: &str,
    action: &str,
    req: &ApiRequest,
) -> ApiResult<Response> {
    match name {
        "auth" => match action {
            "login" => handlers::auth::login(state, req).await,
            "refresh" => handlers::auth::refresh(state, req).await,
            "logout" => handlers::auth::logout(state, req).await,
            "me" => {
                if req.method == Method::GET {
                    handlers::auth::me(state, req).await
                } else {
                    handlers::auth::me_update(state, req).await
                }
            }
            _ => Err(unknown_action("auth", action)),
        },
        "users" => {
            req.require_entity()?.require_admin()?;
            match action {
                "list" => handlers::users::list(state, req).await,
                "get" => handlers::users::get(state, req).await,
                "create" => handlers::users::create(state, req).await,
                "update" => handlers::users::update(state, req).await,
                "destroy" => handlers::users::destroy(state, req).await,
                "revoke_sessions" => handlers::users::revoke_sessions(state, req).await,
                _ => Err(unknown_action("users", action)),
            }
        }
        "apikeys" => {
            req.require_entity()?.require_admin()?;
            match action {
                "list" => handlers::apikeys::list(state, req).await,
                "get" => handlers::apikeys::get(state, req).await,
                "create" => handlers::apikeys::create(state, req).await,
                "update" => handlers::apikeys::update(state, req).await,
                "destroy" => handlers::apikeys::destroy(state, req).await,
                _ => Err(unknown_action("apikeys", action)),
            }
        }
        "collections" => match action {
            "list" => handlers::collections::list(state, req).await,
            "get" => handlers::collections::get(state, req).await,
            "create" | "update" | "destroy" => {
                req.require_entity()?.require_admin()?;
                match action {
                    "create" => handlers::collections::create(state, req).await,
                    "update" => handlers::collections::update(state, req).await,
                    _ => handlers::collections::destroy(state, req).await,
                }
            }
            _ => Err(unknown_action("collections", action)),
        },
        "doc" => match action {
            "refresh" => {
                req.require_entity()?.require_admin()?;
                handlers::doc::refresh().await
            }
            _ => Err(unknown_action("doc", action)),
        },
        collection => data_route(state, collection, action, req).await,
    }
}

async fn data_route(
    state: &AppState,
    collection: &str,
    action: &str,
    req: &ApiRequest,
) -> ApiResult<Response> {
    if is_system_table(collection) {
        return Err(MoonError::NotFound(format!("collection '{}' not found", collection)).into());
    }
    let schema = state
        .registry
        .get(collection)
        .ok_or_else(|| MoonError::NotFound(format!("collection '{}' not found", collection)))?;

    match action {
        "list" => handlers::data::list(state, &schema, req).await,
        "get" => handlers::data::get(state, &schema, req).await,
        "schema" => handlers::data::schema_info(state, &schema, req).await,
        "create" => {
            req.require_entity()?.require_write()?;
            handlers::data::create(state, &schema, req).await
        }
        "update" => {
            req.require_entity()?.require_write()?;
            handlers::data::update(state, &schema, req).await
        }
        "destroy" => {
            req.require_entity()?.require_write()?;
            handlers::data::destroy(state, &schema, req).await
        }
        other => match AggFunc::parse(other) {
            Some(func) => handlers::data::aggregate(state, &schema, func, req).await,
            None => Err(unknown_action(collection, other)),
        },
    }
}

fn unknown_action(name: &str, action: &str) -> ApiError {
    ApiError::new(MoonError::NotFound(format!(
        "'{}' has no action '{}'",
        name, action
    )))
}
