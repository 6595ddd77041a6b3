//! Admin user management.

use axum::http::StatusCode;
use axum::response::Response;
use moon_common::MoonError;
use moon_db::SqlParam;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::password::hash_password;
use crate::auth::{store, Role};
use crate::error::{json_response, ApiResult};
use crate::state::AppState;

use super::ApiRequest;

const LIST_LIMIT: i64 = 1000;

fn validate_username(username: &str) -> moon_common::Result<()> {
    if username.len() < 3 || username.len() > 64 {
        return Err(MoonError::Validation(
            "username must be between 3 and 64 characters".into(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> moon_common::Result<()> {
    if !email.contains('@') || email.len() > 255 {
        return Err(MoonError::Validation("invalid email address".into()));
    }
    Ok(())
}

/// `GET /users:list`.
pub async fn list(state: &AppState, _req: &ApiRequest) -> ApiResult<Response> {
    let users = store::list_users(&state.db, LIST_LIMIT).await?;
    let data: Vec<_> = users.iter().map(|u| u.public_json()).collect();
    let body = json!({ "count": data.len(), "data": data });
    Ok(json_response(StatusCode::OK, &body))
}

/// `GET /users:get?id=`.
pub async fn get(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let id = req
        .query_value("id")
        .ok_or_else(|| MoonError::Validation("the 'id' query parameter is required".into()))?;
    let user = store::find_user_by_id(&state.db, id)
        .await?
        .ok_or_else(|| MoonError::NotFound(format!("user '{}' not found", id)))?;
    Ok(json_response(StatusCode::OK, &user.public_json()))
}

#[derive(Deserialize)]
struct CreatePayload {
    username: String,
    email: String,
    password: String,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    can_write: bool,
}

/// `POST /users:create`.
pub async fn create(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let payload: CreatePayload = serde_json::from_value(
        req.body
            .clone()
            .ok_or_else(|| MoonError::Validation("request body required".into()))?,
    )
    .map_err(|e| MoonError::Validation(format!("invalid user definition: {}", e)))?;

    validate_username(&payload.username)?;
    validate_email(&payload.email)?;
    let hash = hash_password(&payload.password)?;
    let user = store::create_user(
        &state.db,
        &payload.username,
        &payload.email,
        &hash,
        payload.role.unwrap_or(Role::User),
        payload.can_write,
    )
    .await?;

    info!(user_id = %user.id, username = %user.username, "user created");
    Ok(json_response(StatusCode::CREATED, &user.public_json()))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct UpdatePayload {
    id: String,
    email: Option<String>,
    password: Option<String>,
    role: Option<Role>,
    can_write: Option<bool>,
}

/// `POST /users:update`: partial; a password change revokes sessions.
pub async fn update(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let payload: UpdatePayload = serde_json::from_value(
        req.body
            .clone()
            .ok_or_else(|| MoonError::Validation("request body required".into()))?,
    )
    .map_err(|e| MoonError::Validation(format!("invalid user update: {}", e)))?;
    if payload.id.is_empty() {
        return Err(MoonError::Validation("the 'id' member is required".into()).into());
    }

    let mut sets: Vec<(String, SqlParam)> = Vec::new();
    if let Some(email) = &payload.email {
        validate_email(email)?;
        sets.push(("email".into(), SqlParam::Text(email.to_lowercase())));
    }
    let password_changed = if let Some(password) = &payload.password {
        sets.push(("password_hash".into(), SqlParam::Text(hash_password(password)?)));
        true
    } else {
        false
    };
    if let Some(role) = payload.role {
        sets.push(("role".into(), SqlParam::Text(role.as_str().to_string())));
    }
    if let Some(can_write) = payload.can_write {
        sets.push(("can_write".into(), SqlParam::Bool(can_write)));
    }
    if sets.is_empty() {
        return Err(MoonError::Validation("user update changes nothing".into()).into());
    }

    let user = store::update_user(&state.db, &payload.id, sets).await?;
    if password_changed {
        store::revoke_all_for_user(&state.db, &payload.id).await?;
    }
    Ok(json_response(StatusCode::OK, &user.public_json()))
}

#[derive(Deserialize)]
struct IdPayload {
    id: String,
}

fn id_from(req: &ApiRequest) -> ApiResult<String> {
    if let Some(id) = req.query_value("id") {
        return Ok(id.to_string());
    }
    let payload: IdPayload = serde_json::from_value(
        req.body
            .clone()
            .ok_or_else(|| MoonError::Validation("the 'id' member is required".into()))?,
    )
    .map_err(|_| MoonError::Validation("the 'id' member is required".into()))?;
    Ok(payload.id)
}

/// `POST /users:destroy`: removes the user and all their sessions.
pub async fn destroy(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let id = id_from(req)?;
    let entity = req.require_entity()?;
    if entity.id == id {
        return Err(MoonError::Validation("cannot delete the requesting account".into()).into());
    }
    store::delete_user(&state.db, &id).await?;
    info!(user_id = %id, "user deleted");
    Ok(json_response(StatusCode::OK, &json!({ "deleted": id })))
}

/// `POST /users:revoke_sessions`: invalidates every refresh token of
/// one user.
pub async fn revoke_sessions(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let id = id_from(req)?;
    if store::find_user_by_id(&state.db, &id).await?.is_none() {
        return Err(MoonError::NotFound(format!("user '{}' not found", id)).into());
    }
    let revoked = store::revoke_all_for_user(&state.db, &id).await?;
    info!(user_id = %id, revoked, "sessions revoked by admin");
    Ok(json_response(StatusCode::OK, &json!({ "revoked": revoked })))
}
