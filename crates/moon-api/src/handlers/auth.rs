//! Session handlers: login, refresh, logout, and the `/auth:me` pair.
//!
//! Refresh tokens are single-use: each refresh invalidates the presented
//! token and issues a new pair. Used, revoked, expired and unknown
//! tokens all answer the same `401 invalid_credentials` so the endpoint
//! leaks nothing about token state.

use axum::http::StatusCode;
use axum::response::Response;
use chrono::{Duration as ChronoDuration, Utc};
use moon_common::MoonError;
use moon_db::SqlParam;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::auth::password::{hash_password, verify_password};
use crate::auth::token::TYP_REFRESH;
use crate::auth::{apikey, store, EntityKind};
use crate::error::{json_response, ApiResult};
use crate::state::AppState;

use super::ApiRequest;

#[derive(Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshPayload {
    refresh_token: String,
}

/// Issues the access/refresh pair for a user and persists the refresh
/// hash.
async fn issue_session(state: &AppState, user: &store::User) -> ApiResult<serde_json::Value> {
    let access = state
        .tokens
        .issue_access(&user.id, user.role, user.can_write)?;
    let refresh = state
        .tokens
        .issue_refresh(&user.id, user.role, user.can_write)?;

    let expires_at = Utc::now()
        + ChronoDuration::seconds(state.tokens.refresh_expiry().as_secs() as i64);
    store::insert_refresh_token(&state.db, &apikey::hash_key(&refresh), &user.id, expires_at)
        .await?;

    Ok(json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "Bearer",
        "expires_in": state.tokens.access_expiry().as_secs(),
    }))
}

/// `POST /auth:login`.
pub async fn login(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let payload: LoginPayload = serde_json::from_value(
        req.body
            .clone()
            .ok_or_else(|| MoonError::Validation("request body required".into()))?,
    )
    .map_err(|_| MoonError::Validation("login requires 'username' and 'password'".into()))?;

    let ip = req.client_ip.as_str();
    if let Some(retry_after) = state.login_limiter.blocked_for(ip, &payload.username) {
        return Err(MoonError::LoginAttemptsExceeded { retry_after }.into());
    }

    let user = match store::find_user_by_username(&state.db, &payload.username).await? {
        Some(user) if verify_password(&payload.password, &user.password_hash) => user,
        _ => {
            state.login_limiter.record_failure(ip, &payload.username);
            warn!(username = %payload.username.to_lowercase(), "failed login attempt");
            return Err(MoonError::InvalidCredentials.into());
        }
    };

    state.login_limiter.record_success(ip, &payload.username);
    store::touch_last_login(&state.db, &user.id).await?;

    // Opportunistic cleanup of expired sessions.
    let db = state.db.clone();
    tokio::spawn(async move {
        if let Err(e) = store::delete_expired_tokens(&db).await {
            warn!(error = %e, "expired token cleanup failed");
        }
    });

    let body = issue_session(state, &user).await?;
    info!(user_id = %user.id, "login");
    Ok(json_response(StatusCode::OK, &body))
}

/// `POST /auth:refresh`: single-use rotation.
pub async fn refresh(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let payload: RefreshPayload = serde_json::from_value(
        req.body
            .clone()
            .ok_or_else(|| MoonError::Validation("request body required".into()))?,
    )
    .map_err(|_| MoonError::Validation("refresh requires 'refresh_token'".into()))?;

    let claims = state.tokens.verify(&payload.refresh_token, TYP_REFRESH)?;
    let digest = apikey::hash_key(&payload.refresh_token);

    // Atomic consume enforces the issued → used transition exactly once.
    if !store::consume_refresh_token(&state.db, &digest).await? {
        return Err(MoonError::InvalidCredentials.into());
    }
    let user = store::find_user_by_id(&state.db, &claims.sub)
        .await?
        .ok_or(MoonError::InvalidCredentials)?;

    let body = issue_session(state, &user).await?;
    info!(user_id = %user.id, "session refreshed");
    Ok(json_response(StatusCode::OK, &body))
}

/// `POST /auth:logout`: revokes the presented refresh token.
pub async fn logout(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    req.require_entity()?;
    let payload: RefreshPayload = serde_json::from_value(
        req.body
            .clone()
            .ok_or_else(|| MoonError::Validation("request body required".into()))?,
    )
    .map_err(|_| MoonError::Validation("logout requires 'refresh_token'".into()))?;

    let digest = apikey::hash_key(&payload.refresh_token);
    if !store::revoke_refresh_token(&state.db, &digest).await? {
        return Err(MoonError::InvalidCredentials.into());
    }
    Ok(json_response(StatusCode::OK, &json!({ "logged_out": true })))
}

/// `GET /auth:me`: the authenticated principal.
pub async fn me(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let entity = req.require_entity()?;
    let body = match entity.kind {
        EntityKind::User => {
            let user = store::find_user_by_id(&state.db, &entity.id)
                .await?
                .ok_or(MoonError::InvalidCredentials)?;
            user.public_json()
        }
        EntityKind::ApiKey => {
            let key = store::find_apikey_by_id(&state.db, &entity.id)
                .await?
                .ok_or(MoonError::InvalidCredentials)?;
            key.public_json()
        }
    };
    Ok(json_response(StatusCode::OK, &body))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct MeUpdatePayload {
    email: Option<String>,
    password: Option<String>,
}

/// `POST /auth:me`: self-service email/password update. A password
/// change revokes every live session of the account.
pub async fn me_update(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let entity = req.require_entity()?;
    if entity.kind != EntityKind::User {
        return Err(MoonError::Forbidden("api keys cannot update a profile".into()).into());
    }

    let payload: MeUpdatePayload = serde_json::from_value(
        req.body
            .clone()
            .ok_or_else(|| MoonError::Validation("request body required".into()))?,
    )
    .map_err(|e| MoonError::Validation(format!("invalid profile update: {}", e)))?;

    let mut sets: Vec<(String, SqlParam)> = Vec::new();
    if let Some(email) = &payload.email {
        if !email.contains('@') {
            return Err(MoonError::Validation("invalid email address".into()).into());
        }
        sets.push(("email".into(), SqlParam::Text(email.to_lowercase())));
    }
    let password_changed = if let Some(password) = &payload.password {
        sets.push(("password_hash".into(), SqlParam::Text(hash_password(password)?)));
        true
    } else {
        false
    };
    if sets.is_empty() {
        return Err(MoonError::Validation("profile update changes nothing".into()).into());
    }

    let user = store::update_user(&state.db, &entity.id, sets).await?;
    if password_changed {
        let revoked = store::revoke_all_for_user(&state.db, &entity.id).await?;
        info!(user_id = %entity.id, revoked, "password changed, sessions revoked");
    }
    Ok(json_response(StatusCode::OK, &user.public_json()))
}
