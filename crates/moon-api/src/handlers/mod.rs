//! Request handlers.
//!
//! The dispatcher parses `/{name}:{action}`, enforces the authorization
//! matrix, and calls into these modules with an [`ApiRequest`] carrying
//! the already-read body, query pairs and authenticated entity.

pub mod apikeys;
pub mod auth;
pub mod collections;
pub mod data;
pub mod doc;
pub mod health;
pub mod users;

use moon_common::{MoonError, Result};

use crate::auth::AuthEntity;

/// Everything a handler needs from the HTTP request.
pub struct ApiRequest {
    pub method: axum::http::Method,
    /// Decoded query pairs in order of appearance.
    pub query: Vec<(String, String)>,
    /// Parsed JSON body; `None` for empty bodies.
    pub body: Option<serde_json::Value>,
    pub entity: Option<AuthEntity>,
    pub idempotency_key: Option<String>,
    pub client_ip: String,
}

impl ApiRequest {
    /// First value for a query key.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `?atomic=` flag; batches are atomic unless explicitly disabled.
    pub fn atomic(&self) -> bool {
        self.query_value("atomic") != Some("false")
    }

    /// The authenticated entity; the auth middleware guarantees one on
    /// protected paths.
    pub fn require_entity(&self) -> Result<&AuthEntity> {
        self.entity
            .as_ref()
            .ok_or(MoonError::AuthenticationRequired)
    }

    /// The top-level JSON object of the body.
    pub fn body_object(&self) -> Result<&serde_json::Map<String, serde_json::Value>> {
        self.body
            .as_ref()
            .and_then(|b| b.as_object())
            .ok_or_else(|| MoonError::Validation("request body must be a JSON object".into()))
    }

    /// The `data` member of the body, single object or array.
    pub fn data(&self) -> Result<&serde_json::Value> {
        self.body_object()?
            .get("data")
            .ok_or_else(|| MoonError::Validation("request body requires a 'data' member".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: Vec<(&str, &str)>, body: Option<serde_json::Value>) -> ApiRequest {
        ApiRequest {
            method: axum::http::Method::POST,
            query: query
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body,
            entity: None,
            idempotency_key: None,
            client_ip: "127.0.0.1".into(),
        }
    }

    #[test]
    fn test_atomic_default() {
        assert!(request(vec![], None).atomic());
        assert!(request(vec![("atomic", "true")], None).atomic());
        assert!(!request(vec![("atomic", "false")], None).atomic());
    }

    #[test]
    fn test_data_member_required() {
        let req = request(vec![], Some(serde_json::json!({"data": {"a": 1}})));
        assert!(req.data().is_ok());

        let req = request(vec![], Some(serde_json::json!({"a": 1})));
        assert!(req.data().is_err());

        let req = request(vec![], None);
        assert!(req.data().is_err());
    }
}
