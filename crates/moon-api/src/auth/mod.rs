//! Authentication and authorization.
//!
//! Bearer tokens only. A `moon_live_` prefix routes to the API key path,
//! three dot-separated segments route to the JWT path, anything else is
//! a format error. On success the pipeline attaches an [`AuthEntity`] to
//! the request; role and write gates read it from there.

pub mod apikey;
pub mod middleware;
pub mod password;
pub mod store;
pub mod token;

use moon_common::{MoonError, Result};
use serde::{Deserialize, Serialize};

/// What kind of principal authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    ApiKey,
}

/// Coarse role model: admins manage the system, users consume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(MoonError::Validation(format!("unknown role '{}'", other))),
        }
    }
}

/// The authenticated principal attached to the request context.
#[derive(Debug, Clone, Serialize)]
pub struct AuthEntity {
    pub id: String,
    pub kind: EntityKind,
    pub role: Role,
    pub can_write: bool,
}

impl AuthEntity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// `RequireRole("admin")`: 403 `admin_required` for everyone else.
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(MoonError::AdminRequired)
        }
    }

    /// `RequireWrite`: admins and `can_write` users/keys pass.
    pub fn require_write(&self) -> Result<()> {
        if self.is_admin() || self.can_write {
            Ok(())
        } else {
            Err(MoonError::WritePermissionRequired)
        }
    }
}

/// Shape-based routing of a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenShape {
    ApiKey,
    Jwt,
}

/// Classifies a bearer token by shape; neither pattern is a format error.
pub fn classify_token(token: &str) -> Result<TokenShape> {
    if token.starts_with(apikey::KEY_PREFIX) {
        return Ok(TokenShape::ApiKey);
    }
    if token.split('.').count() == 3 && !token.contains(char::is_whitespace) {
        return Ok(TokenShape::Jwt);
    }
    Err(MoonError::InvalidTokenFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(role: Role, can_write: bool) -> AuthEntity {
        AuthEntity {
            id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".into(),
            kind: EntityKind::User,
            role,
            can_write,
        }
    }

    #[test]
    fn test_admin_gate() {
        assert!(entity(Role::Admin, false).require_admin().is_ok());
        assert!(matches!(
            entity(Role::User, true).require_admin().unwrap_err(),
            MoonError::AdminRequired
        ));
    }

    #[test]
    fn test_write_gate() {
        assert!(entity(Role::Admin, false).require_write().is_ok());
        assert!(entity(Role::User, true).require_write().is_ok());
        assert!(matches!(
            entity(Role::User, false).require_write().unwrap_err(),
            MoonError::WritePermissionRequired
        ));
    }

    #[test]
    fn test_token_classification() {
        let key = format!("{}{}", apikey::KEY_PREFIX, "a".repeat(64));
        assert_eq!(classify_token(&key).unwrap(), TokenShape::ApiKey);
        assert_eq!(classify_token("aaa.bbb.ccc").unwrap(), TokenShape::Jwt);
        assert!(classify_token("just-a-string").is_err());
        assert!(classify_token("a.b").is_err());
        assert!(classify_token("a.b.c.d").is_err());
    }

    #[test]
    fn test_role_serde() {
        assert_eq!(Role::parse("admin").unwrap(), Role::Admin);
        assert!(Role::parse("root").is_err());
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
    }
}
