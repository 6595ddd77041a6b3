//! Field definitions.
//!
//! A field is one user-declared column of a collection. The type set is
//! closed; everything dialect-specific about storage lives in `moon-db`.

use moon_common::{MoonError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::decimal::{DEFAULT_DECIMAL_SCALE, MAX_DECIMAL_SCALE};

/// Default VARCHAR length for `string` fields.
pub const DEFAULT_STRING_LENGTH: u32 = 255;

/// Upper bound for a declared `string` length.
pub const MAX_STRING_LENGTH: u32 = 65_535;

/// Identifiers (collection and field names) must match this shape and stay
/// within the portable identifier length of the supported engines.
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").expect("identifier regex"));

const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validates a collection or field name against the identifier rules.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MoonError::Validation("identifier cannot be empty".into()));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MoonError::Validation(format!(
            "identifier '{}' exceeds {} characters",
            name, MAX_IDENTIFIER_LENGTH
        )));
    }
    if !IDENTIFIER_RE.is_match(name) {
        return Err(MoonError::Validation(format!(
            "identifier '{}' must start with a letter and contain only letters, digits and underscores",
            name
        )));
    }
    Ok(())
}

/// The closed set of field types a collection may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Length-bounded VARCHAR, default 255.
    String,
    /// Unbounded TEXT.
    Text,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Exact fixed-scale NUMERIC, serialized as a string.
    Decimal,
    /// JSON `true`/`false` on every dialect.
    Boolean,
    /// RFC3339 UTC timestamp.
    Datetime,
    /// Arbitrary JSON document.
    Json,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Decimal => "decimal",
            FieldType::Boolean => "boolean",
            FieldType::Datetime => "datetime",
            FieldType::Json => "json",
        }
    }

    /// Types accepted by `:sum` and `:avg`.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float | FieldType::Decimal)
    }

    /// Types accepted by `:min` and `:max` (orderable).
    pub fn is_orderable(&self) -> bool {
        !matches!(self, FieldType::Json | FieldType::Boolean)
    }

    /// Types included in the `?q=` per-field LIKE search.
    pub fn is_searchable(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Text)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FieldType {
    type Err = MoonError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "string" => Ok(FieldType::String),
            "text" => Ok(FieldType::Text),
            "integer" => Ok(FieldType::Integer),
            "float" => Ok(FieldType::Float),
            "decimal" => Ok(FieldType::Decimal),
            "boolean" => Ok(FieldType::Boolean),
            "datetime" => Ok(FieldType::Datetime),
            "json" => Ok(FieldType::Json),
            other => Err(MoonError::Validation(format!("unknown field type '{}'", other))),
        }
    }
}

/// One user-declared column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
    /// Default value applied by the database when the field is omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared length for `string` fields; `None` means 255.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Fractional digits for `decimal` fields; `None` means 2, max 10.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

impl FieldDef {
    /// Shorthand used heavily in tests and system-table definitions.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            default: None,
            unique: false,
            description: None,
            max_length: None,
            scale: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Effective VARCHAR length for `string` fields.
    pub fn string_length(&self) -> u32 {
        self.max_length.unwrap_or(DEFAULT_STRING_LENGTH)
    }

    /// Effective scale for `decimal` fields.
    pub fn decimal_scale(&self) -> u32 {
        self.scale.unwrap_or(DEFAULT_DECIMAL_SCALE)
    }

    /// Checks the attributes of this definition in isolation.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.name)?;

        if let Some(len) = self.max_length {
            if self.field_type != FieldType::String {
                return Err(MoonError::Validation(format!(
                    "field '{}': max_length only applies to string fields",
                    self.name
                )));
            }
            if len == 0 || len > MAX_STRING_LENGTH {
                return Err(MoonError::Validation(format!(
                    "field '{}': max_length must be between 1 and {}",
                    self.name, MAX_STRING_LENGTH
                )));
            }
        }

        if let Some(scale) = self.scale {
            if self.field_type != FieldType::Decimal {
                return Err(MoonError::Validation(format!(
                    "field '{}': scale only applies to decimal fields",
                    self.name
                )));
            }
            if scale > MAX_DECIMAL_SCALE {
                return Err(MoonError::Validation(format!(
                    "field '{}': scale must not exceed {}",
                    self.name, MAX_DECIMAL_SCALE
                )));
            }
        }

        if self.unique && matches!(self.field_type, FieldType::Text | FieldType::Json) {
            return Err(MoonError::Validation(format!(
                "field '{}': unique is not supported on {} fields",
                self.name, self.field_type
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_accepts() {
        for name in ["products", "a", "UserAccounts", "order_items_2"] {
            assert!(validate_identifier(name).is_ok(), "{} should be valid", name);
        }
    }

    #[test]
    fn test_identifier_rejects() {
        for name in ["", "1abc", "_lead", "has-dash", "has space", "semi;colon", "emoji🙂"] {
            assert!(validate_identifier(name).is_err(), "{} should be invalid", name);
        }
    }

    #[test]
    fn test_identifier_length_bound() {
        let ok = "a".repeat(63);
        let too_long = "a".repeat(64);
        assert!(validate_identifier(&ok).is_ok());
        assert!(validate_identifier(&too_long).is_err());
    }

    #[test]
    fn test_field_type_serde_round_trip() {
        for (ty, text) in [
            (FieldType::String, "\"string\""),
            (FieldType::Datetime, "\"datetime\""),
            (FieldType::Json, "\"json\""),
        ] {
            assert_eq!(serde_json::to_string(&ty).unwrap(), text);
            assert_eq!(serde_json::from_str::<FieldType>(text).unwrap(), ty);
        }
    }

    #[test]
    fn test_field_def_deserialization_defaults() {
        let field: FieldDef =
            serde_json::from_str(r#"{"name":"title","type":"string"}"#).unwrap();
        assert_eq!(field.name, "title");
        assert!(!field.nullable);
        assert!(!field.unique);
        assert_eq!(field.string_length(), 255);
    }

    #[test]
    fn test_scale_only_on_decimal() {
        let mut field = FieldDef::new("price", FieldType::String);
        field.scale = Some(4);
        assert!(field.validate().is_err());

        let mut field = FieldDef::new("price", FieldType::Decimal);
        field.scale = Some(4);
        assert!(field.validate().is_ok());
        field.scale = Some(11);
        assert!(field.validate().is_err());
    }

    #[test]
    fn test_unique_text_rejected() {
        let field = FieldDef::new("body", FieldType::Text).unique();
        assert!(field.validate().is_err());
    }

    #[test]
    fn test_numeric_and_orderable_sets() {
        assert!(FieldType::Decimal.is_numeric());
        assert!(!FieldType::Datetime.is_numeric());
        assert!(FieldType::Datetime.is_orderable());
        assert!(!FieldType::Json.is_orderable());
        assert!(FieldType::Text.is_searchable());
        assert!(!FieldType::Integer.is_searchable());
    }
}
