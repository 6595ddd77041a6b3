//! Authentication middleware.
//!
//! Sits directly inside CORS. Public endpoints and CORS `bypass_auth`
//! matches pass through; everything else must present a valid bearer
//! token and gets an [`AuthEntity`](super::AuthEntity) attached to the
//! request.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use moon_common::{MoonError, Result};

use crate::cors::audit_bypass;
use crate::error::ApiError;
use crate::state::AppState;

use super::token::TYP_ACCESS;
use super::{apikey, classify_token, store, AuthEntity, TokenShape};

/// Paths reachable without credentials.
pub fn is_public(path: &str) -> bool {
    matches!(
        path,
        "/health" | "/doc" | "/doc/llms-full.txt" | "/auth:login" | "/auth:refresh"
    )
}

/// The authentication middleware.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = state.relative_path(req.uri().path());
    if is_public(&path) {
        return next.run(req).await;
    }
    if state.cors.bypasses_auth(&path) {
        audit_bypass(&path);
        return next.run(req).await;
    }

    match resolve_entity(&state, req.headers()).await {
        Ok(entity) => {
            req.extensions_mut().insert(entity);
            next.run(req).await
        }
        Err(error) => ApiError::new(error).into_response(),
    }
}

/// Extracts and verifies the bearer token, producing the request entity.
async fn resolve_entity(state: &AppState, headers: &axum::http::HeaderMap) -> Result<AuthEntity> {
    let header = headers
        .get(header::AUTHORIZATION)
        .ok_or(MoonError::AuthenticationRequired)?;
    let value = header.to_str().map_err(|_| MoonError::InvalidTokenFormat)?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or(MoonError::InvalidTokenFormat)?
        .trim();

    match classify_token(token)? {
        TokenShape::ApiKey => {
            if !state.config.apikey.enabled {
                return Err(MoonError::InvalidCredentials);
            }
            apikey::validate_key_format(token)?;
            let digest = apikey::hash_key(token);
            let record = store::find_apikey_by_hash(&state.db, &digest)
                .await?
                .ok_or(MoonError::InvalidCredentials)?;
            if !apikey::constant_time_eq(&record.key_hash, &digest) {
                return Err(MoonError::InvalidCredentials);
            }
            store::touch_apikey_last_used(state.db.clone(), record.id.clone());
            Ok(record.entity())
        }
        TokenShape::Jwt => {
            let claims = state.tokens.verify(token, TYP_ACCESS)?;
            Ok(claims.entity())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_paths() {
        for path in ["/health", "/doc", "/doc/llms-full.txt", "/auth:login", "/auth:refresh"] {
            assert!(is_public(path), "{} should be public", path);
        }
        for path in ["/auth:logout", "/auth:me", "/products:list", "/collections:list", "/doc:refresh"] {
            assert!(!is_public(path), "{} should require auth", path);
        }
    }
}
