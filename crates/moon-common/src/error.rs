//! Error types for the moon backend.
//!
//! One unified error enum crosses every layer. Each variant knows its wire
//! code (the `error` field of the response envelope) and its HTTP status,
//! so handlers never map errors by hand.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for moon operations.
pub type Result<T> = std::result::Result<T, MoonError>;

/// Unified error type for all moon operations.
#[derive(Error, Debug, Clone)]
pub enum MoonError {
    /// Payload or query failed validation (field-level or request limit).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Strict-mode payload carried a field the collection does not declare.
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Body or batch exceeded the configured size limits.
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// No credentials were presented on a protected endpoint.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// A bearer token was presented but matches neither token shape.
    #[error("Invalid token format")]
    InvalidTokenFormat,

    /// Login, refresh, or token verification failed.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Authenticated but not permitted.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Endpoint requires the admin role.
    #[error("Admin role required")]
    AdminRequired,

    /// Endpoint requires write permission.
    #[error("Write permission required")]
    WritePermissionRequired,

    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint violation.
    #[error("Duplicate: {0}")]
    Conflict(String),

    /// Per-entity request budget exhausted. Carries seconds until refill.
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },

    /// Too many failed logins for an (ip, username) pair.
    #[error("Too many login attempts")]
    LoginAttemptsExceeded { retry_after: u64 },

    /// The operation is not expressible on the active dialect.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The backing database cannot be reached.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// A statement exceeded the configured query timeout.
    #[error("Query timeout: {0}")]
    Timeout(String),

    /// Dialect-internal failure; surfaced to clients as a generic error.
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MoonError {
    /// Wire code for the `error` field of the response envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            MoonError::Validation(_) => "validation_error",
            MoonError::UnknownField(_) => "unknown_field",
            MoonError::PayloadTooLarge(_) => "payload_too_large",
            MoonError::AuthenticationRequired => "authentication_required",
            MoonError::InvalidTokenFormat => "invalid_token_format",
            MoonError::InvalidCredentials => "invalid_credentials",
            MoonError::Forbidden(_) => "forbidden",
            MoonError::AdminRequired => "admin_required",
            MoonError::WritePermissionRequired => "write_permission_required",
            MoonError::NotFound(_) => "not_found",
            MoonError::Conflict(_) => "duplicate",
            MoonError::RateLimited { .. } => "rate_limit_exceeded",
            MoonError::LoginAttemptsExceeded { .. } => "login_attempts_exceeded",
            MoonError::Unsupported(_) => "unsupported_operation",
            MoonError::Unavailable(_) | MoonError::Timeout(_) => "service_unavailable",
            MoonError::Database(_) | MoonError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            MoonError::Validation(_) | MoonError::UnknownField(_) => 400,
            MoonError::PayloadTooLarge(_) => 413,
            MoonError::AuthenticationRequired
            | MoonError::InvalidTokenFormat
            | MoonError::InvalidCredentials => 401,
            MoonError::Forbidden(_)
            | MoonError::AdminRequired
            | MoonError::WritePermissionRequired => 403,
            MoonError::NotFound(_) => 404,
            MoonError::Conflict(_) => 409,
            MoonError::RateLimited { .. } | MoonError::LoginAttemptsExceeded { .. } => 429,
            MoonError::Unsupported(_) => 422,
            MoonError::Unavailable(_) | MoonError::Timeout(_) => 503,
            MoonError::Database(_) | MoonError::Internal(_) => 500,
        }
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MoonError::Timeout(_) | MoonError::Unavailable(_) | MoonError::RateLimited { .. }
        )
    }

    /// Returns true for unique-constraint conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, MoonError::Conflict(_))
    }

    /// Message shown to clients. Internal variants are masked; everything
    /// else is surfaced verbatim.
    pub fn public_message(&self) -> String {
        match self {
            MoonError::Database(_) | MoonError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Builds the wire envelope for this error.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.kind().to_string(),
            message: self.public_message(),
            code: self.status(),
            details: None,
        }
    }
}

impl From<serde_json::Error> for MoonError {
    fn from(err: serde_json::Error) -> Self {
        MoonError::Validation(format!("invalid JSON: {}", err))
    }
}

/// A single structured validation error.
///
/// `index` is set when the error belongs to an item of a batch payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub field: String,
    pub code: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            index: None,
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    /// Attach the batch item index this error belongs to.
    pub fn at_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(i) => write!(f, "[{}] {}: {}", i, self.field, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

/// Wire envelope: `{"error","message","code"}` plus optional field details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

impl ErrorBody {
    /// Attach structured field errors to the envelope.
    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        if !details.is_empty() {
            self.details = Some(details);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_status_pairs() {
        let cases: Vec<(MoonError, &str, u16)> = vec![
            (MoonError::Validation("x".into()), "validation_error", 400),
            (MoonError::UnknownField("f".into()), "unknown_field", 400),
            (MoonError::PayloadTooLarge("big".into()), "payload_too_large", 413),
            (MoonError::AuthenticationRequired, "authentication_required", 401),
            (MoonError::InvalidTokenFormat, "invalid_token_format", 401),
            (MoonError::InvalidCredentials, "invalid_credentials", 401),
            (MoonError::AdminRequired, "admin_required", 403),
            (MoonError::WritePermissionRequired, "write_permission_required", 403),
            (MoonError::NotFound("row".into()), "not_found", 404),
            (MoonError::Conflict("dup".into()), "duplicate", 409),
            (MoonError::RateLimited { retry_after: 3 }, "rate_limit_exceeded", 429),
            (
                MoonError::LoginAttemptsExceeded { retry_after: 60 },
                "login_attempts_exceeded",
                429,
            ),
            (MoonError::Unsupported("alter".into()), "unsupported_operation", 422),
            (MoonError::Unavailable("down".into()), "service_unavailable", 503),
            (MoonError::Timeout("slow".into()), "service_unavailable", 503),
            (MoonError::Database("boom".into()), "internal_error", 500),
            (MoonError::Internal("bug".into()), "internal_error", 500),
        ];

        for (err, kind, status) in cases {
            assert_eq!(err.kind(), kind, "kind for {:?}", err);
            assert_eq!(err.status(), status, "status for {:?}", err);
        }
    }

    #[test]
    fn test_internal_messages_are_masked() {
        let err = MoonError::Database("duplicate key value violates".into());
        assert_eq!(err.public_message(), "An internal error occurred");

        let err = MoonError::Conflict("slug already exists".into());
        assert!(err.public_message().contains("slug already exists"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(MoonError::Timeout("t".into()).is_retryable());
        assert!(MoonError::Unavailable("u".into()).is_retryable());
        assert!(!MoonError::Conflict("c".into()).is_retryable());
        assert!(!MoonError::Validation("v".into()).is_retryable());
    }

    #[test]
    fn test_envelope_shape() {
        let body = MoonError::NotFound("record abc".into()).to_body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "not_found");
        assert_eq!(json["code"], 404);
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_envelope_with_details() {
        let body = MoonError::Validation("1 field failed".into())
            .to_body()
            .with_details(vec![FieldError::new("price", "invalid_decimal", "bad scale").at_index(1)]);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["details"][0]["index"], 1);
        assert_eq!(json["details"][0]["field"], "price");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("{nope").unwrap_err();
        let err: MoonError = json_err.into();
        assert!(matches!(err, MoonError::Validation(_)));
    }

    #[test]
    fn test_field_error_display() {
        let err = FieldError::new("title", "required", "field is required");
        assert_eq!(err.to_string(), "title: field is required");
        assert_eq!(err.at_index(2).to_string(), "[2] title: field is required");
    }
}
