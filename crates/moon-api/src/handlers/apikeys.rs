//! Admin API key management. `:create` is the only place the plaintext
//! key ever appears.

use axum::http::StatusCode;
use axum::response::Response;
use moon_common::MoonError;
use moon_db::SqlParam;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::{store, Role};
use crate::error::{json_response, ApiResult};
use crate::state::AppState;

use super::ApiRequest;

const LIST_LIMIT: i64 = 1000;

/// `GET /apikeys:list`.
pub async fn list(state: &AppState, _req: &ApiRequest) -> ApiResult<Response> {
    let keys = store::list_apikeys(&state.db, LIST_LIMIT).await?;
    let data: Vec<_> = keys.iter().map(|k| k.public_json()).collect();
    Ok(json_response(StatusCode::OK, &json!({ "count": data.len(), "data": data })))
}

/// `GET /apikeys:get?id=`.
pub async fn get(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let id = req
        .query_value("id")
        .ok_or_else(|| MoonError::Validation("the 'id' query parameter is required".into()))?;
    let key = store::find_apikey_by_id(&state.db, id)
        .await?
        .ok_or_else(|| MoonError::NotFound(format!("api key '{}' not found", id)))?;
    Ok(json_response(StatusCode::OK, &key.public_json()))
}

#[derive(Deserialize)]
struct CreatePayload {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    can_write: bool,
}

/// `POST /apikeys:create`: returns the plaintext key exactly once.
pub async fn create(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    if !state.config.apikey.enabled {
        return Err(MoonError::Unsupported("api keys are disabled".into()).into());
    }
    let payload: CreatePayload = serde_json::from_value(
        req.body
            .clone()
            .ok_or_else(|| MoonError::Validation("request body required".into()))?,
    )
    .map_err(|e| MoonError::Validation(format!("invalid api key definition: {}", e)))?;
    if payload.name.is_empty() || payload.name.len() > 255 {
        return Err(MoonError::Validation("name must be 1-255 characters".into()).into());
    }

    let (record, plaintext) = store::create_apikey(
        &state.db,
        &payload.name,
        payload.description.as_deref(),
        payload.role.unwrap_or(Role::User),
        payload.can_write,
    )
    .await?;

    info!(apikey_id = %record.id, name = %record.name, "api key created");
    let mut body = record.public_json();
    if let Some(map) = body.as_object_mut() {
        map.insert("key".into(), json!(plaintext));
    }
    Ok(json_response(StatusCode::CREATED, &body))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct UpdatePayload {
    id: String,
    name: Option<String>,
    description: Option<String>,
    role: Option<Role>,
    can_write: Option<bool>,
}

/// `POST /apikeys:update`.
pub async fn update(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let payload: UpdatePayload = serde_json::from_value(
        req.body
            .clone()
            .ok_or_else(|| MoonError::Validation("request body required".into()))?,
    )
    .map_err(|e| MoonError::Validation(format!("invalid api key update: {}", e)))?;
    if payload.id.is_empty() {
        return Err(MoonError::Validation("the 'id' member is required".into()).into());
    }

    let mut sets: Vec<(String, SqlParam)> = Vec::new();
    if let Some(name) = &payload.name {
        if name.is_empty() || name.len() > 255 {
            return Err(MoonError::Validation("name must be 1-255 characters".into()).into());
        }
        sets.push(("name".into(), SqlParam::Text(name.clone())));
    }
    if let Some(description) = &payload.description {
        sets.push(("description".into(), SqlParam::Text(description.clone())));
    }
    if let Some(role) = payload.role {
        sets.push(("role".into(), SqlParam::Text(role.as_str().to_string())));
    }
    if let Some(can_write) = payload.can_write {
        sets.push(("can_write".into(), SqlParam::Bool(can_write)));
    }
    if sets.is_empty() {
        return Err(MoonError::Validation("api key update changes nothing".into()).into());
    }

    let record = store::update_apikey(&state.db, &payload.id, sets).await?;
    Ok(json_response(StatusCode::OK, &record.public_json()))
}

#[derive(Deserialize)]
struct IdPayload {
    id: String,
}

/// `POST /apikeys:destroy`.
pub async fn destroy(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let id = match req.query_value("id") {
        Some(id) => id.to_string(),
        None => {
            let payload: IdPayload = serde_json::from_value(
                req.body
                    .clone()
                    .ok_or_else(|| MoonError::Validation("the 'id' member is required".into()))?,
            )
            .map_err(|_| MoonError::Validation("the 'id' member is required".into()))?;
            payload.id
        }
    };
    store::delete_apikey(&state.db, &id).await?;
    info!(apikey_id = %id, "api key deleted");
    Ok(json_response(StatusCode::OK, &json!({ "deleted": id })))
}
