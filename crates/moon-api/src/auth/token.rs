//! JWT issuing and verification.
//!
//! HS256 with a shared secret, 30 seconds of clock skew allowed, `exp`
//! and `nbf` enforced. Access and refresh tokens share the claim shape
//! and differ by the `typ` claim; refresh tokens are additionally
//! persisted by hash and single-use (see `store`).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use moon_common::{MoonError, Result};
use serde::{Deserialize, Serialize};

use super::{EntityKind, Role};

/// Allowed clock skew in seconds.
const LEEWAY_SECS: u64 = 30;

pub const TYP_ACCESS: &str = "access";
pub const TYP_REFRESH: &str = "refresh";

/// JWT claims carried by both token types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub role: Role,
    pub can_write: bool,
    /// `access` or `refresh`.
    pub typ: String,
    pub iat: u64,
    pub nbf: u64,
    pub exp: u64,
}

impl Claims {
    /// The pipeline entity this token authenticates.
    pub fn entity(&self) -> super::AuthEntity {
        super::AuthEntity {
            id: self.sub.clone(),
            kind: EntityKind::User,
            role: self.role,
            can_write: self.can_write,
        }
    }
}

/// Issues and verifies the session tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_expiry: Duration,
    refresh_expiry: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("validation", &self.validation)
            .field("access_expiry", &self.access_expiry)
            .field("refresh_expiry", &self.refresh_expiry)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &str, access_expiry: Duration, refresh_expiry: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        validation.validate_nbf = true;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_expiry,
            refresh_expiry,
        }
    }

    pub fn access_expiry(&self) -> Duration {
        self.access_expiry
    }

    pub fn refresh_expiry(&self) -> Duration {
        self.refresh_expiry
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn issue(&self, sub: &str, role: Role, can_write: bool, typ: &str, expiry: Duration) -> Result<String> {
        let now = Self::now();
        let claims = Claims {
            sub: sub.to_string(),
            role,
            can_write,
            typ: typ.to_string(),
            iat: now,
            nbf: now,
            exp: now + expiry.as_secs(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| MoonError::Internal(format!("token signing failed: {}", e)))
    }

    pub fn issue_access(&self, sub: &str, role: Role, can_write: bool) -> Result<String> {
        self.issue(sub, role, can_write, TYP_ACCESS, self.access_expiry)
    }

    pub fn issue_refresh(&self, sub: &str, role: Role, can_write: bool) -> Result<String> {
        self.issue(sub, role, can_write, TYP_REFRESH, self.refresh_expiry)
    }

    /// Verifies signature, expiry and not-before, and that the token is
    /// of the expected type. Every failure reads as invalid credentials.
    pub fn verify(&self, token: &str, expected_typ: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|_| MoonError::InvalidCredentials)?;
        if data.claims.typ != expected_typ {
            return Err(MoonError::InvalidCredentials);
        }
        Ok(data.claims)
    }
}
