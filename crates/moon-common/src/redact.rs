//! Log redaction helpers.
//!
//! Anything that might carry a credential is replaced with a fixed marker
//! before it reaches a log line. Matching is case-insensitive on key names
//! and checks substrings, so `user_password` and `X-Api-Key` both redact.

use serde_json::Value;

/// Replacement marker for redacted values.
pub const REDACTED: &str = "***REDACTED***";

/// Key substrings that always redact, regardless of configuration.
const BUILTIN_SENSITIVE: &[&str] = &["password", "token", "secret", "api_key", "authorization"];

/// Returns true when a key name should have its value redacted.
pub fn is_sensitive_key(key: &str, extra: &[String]) -> bool {
    let lower = key.to_ascii_lowercase();
    let normalized = lower.replace('-', "_");
    BUILTIN_SENSITIVE
        .iter()
        .any(|s| normalized.contains(s))
        || extra
            .iter()
            .any(|s| normalized.contains(&s.to_ascii_lowercase().replace('-', "_")))
}

/// Recursively redacts sensitive values inside a JSON document.
pub fn redact_json(value: &Value, extra: &[String]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if is_sensitive_key(k, extra) {
                        (k.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), redact_json(v, extra))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_json(v, extra)).collect()),
        other => other.clone(),
    }
}

/// Redacts sensitive values in key/value pairs (query strings, headers).
pub fn redact_pairs(pairs: &[(String, String)], extra: &[String]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| {
            if is_sensitive_key(k, extra) {
                (k.clone(), REDACTED.to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}
