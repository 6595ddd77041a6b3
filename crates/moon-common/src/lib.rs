//! Shared foundation for the moon data backend.
//!
//! Every crate in the workspace speaks `MoonError` / `Result`; the HTTP
//! layer renders errors through the wire envelope defined here, and the
//! logging pipeline uses the redaction helpers before anything sensitive
//! can reach a log file.

pub mod error;
pub mod redact;

pub use error::{ErrorBody, FieldError, MoonError, Result};
pub use redact::{is_sensitive_key, redact_json, redact_pairs, REDACTED};
