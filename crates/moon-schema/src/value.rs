//! Tagged row values.
//!
//! Every cell the scanner produces and every parameter the query builder
//! binds is one of these variants. JSON serialization is the wire contract:
//! booleans are real JSON booleans on every dialect, decimals are canonical
//! strings, datetimes are RFC3339 UTC.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;

use crate::decimal::Decimal;

/// A dynamically typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Canonical fixed-scale decimal.
    Decimal(Decimal),
    DateTime(DateTime<Utc>),
    Json(serde_json::Value),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders the value for a JSON response body.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(f) => json!(f),
            Value::Decimal(d) => json!(d.to_string()),
            Value::DateTime(ts) => json!(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Value::Json(v) => v.clone(),
            Value::Text(s) => json!(s),
        }
    }

    /// Short type label used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::DateTime(_) => "datetime",
            Value::Json(_) => "json",
            Value::Text(_) => "string",
        }
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::DateTime(ts)
    }
}
