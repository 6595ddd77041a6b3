//! Payload validation against a collection schema.
//!
//! The validator is strict: every key must be a declared field, system
//! fields are never client-writable, and each value must conform to its
//! field type exactly as it will be stored. Errors are structured
//! `{index?, field, code, message}` entries so batch responses can point
//! at the failing item.

use chrono::{DateTime, Utc};
use moon_common::{FieldError, MoonError, Result};
use serde_json::Value as Json;

use crate::collection::{is_system_field, CollectionSchema};
use crate::decimal::Decimal;
use crate::field::{FieldDef, FieldType};
use crate::value::Value;

/// Request and schema limits, from the `limits`, `batch` and `pagination`
/// configuration sections.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_filters: usize,
    pub max_sort_fields: usize,
    pub max_fields_per_collection: usize,
    pub max_collections: usize,
    pub max_batch_size: usize,
    pub max_payload_bytes: usize,
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_filters: 20,
            max_sort_fields: 5,
            max_fields_per_collection: 100,
            max_collections: 1000,
            max_batch_size: 50,
            max_payload_bytes: 2 * 1024 * 1024,
            default_page_size: 50,
            max_page_size: 1000,
        }
    }
}

impl Limits {
    pub fn check_filter_count(&self, count: usize) -> Result<()> {
        if count > self.max_filters {
            return Err(MoonError::Validation(format!(
                "request uses {} filters, maximum is {}",
                count, self.max_filters
            )));
        }
        Ok(())
    }

    pub fn check_sort_count(&self, count: usize) -> Result<()> {
        if count > self.max_sort_fields {
            return Err(MoonError::Validation(format!(
                "request uses {} sort fields, maximum is {}",
                count, self.max_sort_fields
            )));
        }
        Ok(())
    }

    pub fn check_batch_size(&self, count: usize) -> Result<()> {
        if count > self.max_batch_size {
            return Err(MoonError::PayloadTooLarge(format!(
                "batch of {} items exceeds maximum of {}",
                count, self.max_batch_size
            )));
        }
        Ok(())
    }

    pub fn check_payload_bytes(&self, bytes: usize) -> Result<()> {
        if bytes > self.max_payload_bytes {
            return Err(MoonError::PayloadTooLarge(format!(
                "payload of {} bytes exceeds maximum of {}",
                bytes, self.max_payload_bytes
            )));
        }
        Ok(())
    }

    pub fn check_field_count(&self, count: usize) -> Result<()> {
        if count > self.max_fields_per_collection {
            return Err(MoonError::Validation(format!(
                "collection declares {} fields, maximum is {}",
                count, self.max_fields_per_collection
            )));
        }
        Ok(())
    }

    pub fn check_collection_count(&self, current: usize) -> Result<()> {
        if current >= self.max_collections {
            return Err(MoonError::Validation(format!(
                "collection limit of {} reached",
                self.max_collections
            )));
        }
        Ok(())
    }

    /// Clamps a requested page size into `1..=max_page_size`, applying the
    /// default when absent.
    pub fn effective_limit(&self, requested: Option<i64>) -> i64 {
        match requested {
            None => self.default_page_size,
            Some(n) if n < 1 => 1,
            Some(n) => n.min(self.max_page_size),
        }
    }
}

/// A payload validated against a schema: column names paired with typed
/// values, in declared field order.
#[derive(Debug, Clone, Default)]
pub struct ValidatedRecord {
    pub columns: Vec<(String, Value)>,
}

impl ValidatedRecord {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Validates payload objects against one collection entry.
pub struct Validator<'a> {
    schema: &'a CollectionSchema,
}

impl<'a> Validator<'a> {
    pub fn new(schema: &'a CollectionSchema) -> Self {
        Self { schema }
    }

    /// Validates a create payload. Missing fields fall back to the
    /// declared default, then to NULL when nullable; otherwise they are
    /// required. The result carries a value for every user field so batch
    /// inserts bind a uniform column set.
    pub fn validate_create(&self, payload: &serde_json::Map<String, Json>) -> std::result::Result<ValidatedRecord, Vec<FieldError>> {
        let mut errors = self.check_keys(payload);
        let mut record = ValidatedRecord::default();

        for field in &self.schema.fields {
            match payload.get(&field.name) {
                Some(value) => match convert_value(field, value) {
                    Ok(v) => record.columns.push((field.name.clone(), v)),
                    Err(e) => errors.push(e),
                },
                None => {
                    if let Some(default) = &field.default {
                        match convert_value(field, default) {
                            Ok(v) => record.columns.push((field.name.clone(), v)),
                            Err(e) => errors.push(e),
                        }
                    } else if field.nullable {
                        record.columns.push((field.name.clone(), Value::Null));
                    } else {
                        errors.push(FieldError::new(
                            &field.name,
                            "required",
                            format!("field '{}' is required", field.name),
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(record)
        } else {
            Err(errors)
        }
    }

    /// Validates a partial update payload: only provided fields are
    /// converted; at least one updatable field must be present.
    pub fn validate_update(&self, payload: &serde_json::Map<String, Json>) -> std::result::Result<ValidatedRecord, Vec<FieldError>> {
        let mut errors = self.check_keys(payload);
        let mut record = ValidatedRecord::default();

        for field in &self.schema.fields {
            if let Some(value) = payload.get(&field.name) {
                match convert_value(field, value) {
                    Ok(v) => record.columns.push((field.name.clone(), v)),
                    Err(e) => errors.push(e),
                }
            }
        }

        if record.is_empty() && errors.is_empty() {
            errors.push(FieldError::new(
                "data",
                "empty_update",
                "update payload provides no fields",
            ));
        }

        if errors.is_empty() {
            Ok(record)
        } else {
            Err(errors)
        }
    }

    fn check_keys(&self, payload: &serde_json::Map<String, Json>) -> Vec<FieldError> {
        let mut errors = Vec::new();
        for key in payload.keys() {
            if is_system_field(key) {
                errors.push(FieldError::new(
                    key,
                    "immutable_field",
                    format!("field '{}' is maintained by the server", key),
                ));
            } else if self.schema.field(key).is_none() {
                errors.push(FieldError::new(
                    key,
                    "unknown_field",
                    format!("collection '{}' has no field '{}'", self.schema.name, key),
                ));
            }
        }
        errors
    }
}

/// Converts one JSON value into its typed column value, enforcing the
/// field's type and format rules.
pub fn convert_value(field: &FieldDef, value: &Json) -> std::result::Result<Value, FieldError> {
    if value.is_null() {
        if field.nullable {
            return Ok(Value::Null);
        }
        return Err(FieldError::new(
            &field.name,
            "not_null",
            format!("field '{}' is not nullable", field.name),
        ));
    }

    let type_error = |expected: &str| {
        FieldError::new(
            &field.name,
            "invalid_type",
            format!("field '{}' expects {}", field.name, expected),
        )
    };

    match field.field_type {
        FieldType::String => {
            let s = value.as_str().ok_or_else(|| type_error("a string"))?;
            let max = field.string_length() as usize;
            if s.chars().count() > max {
                return Err(FieldError::new(
                    &field.name,
                    "too_long",
                    format!("field '{}' exceeds maximum length {}", field.name, max),
                ));
            }
            Ok(Value::Text(s.to_string()))
        }
        FieldType::Text => {
            let s = value.as_str().ok_or_else(|| type_error("a string"))?;
            Ok(Value::Text(s.to_string()))
        }
        FieldType::Integer => match value.as_i64() {
            Some(i) => Ok(Value::Int(i)),
            None => Err(type_error("an integer")),
        },
        FieldType::Float => match value.as_f64() {
            Some(f) => Ok(Value::Float(f)),
            None => Err(type_error("a number")),
        },
        FieldType::Decimal => {
            let s = value.as_str().ok_or_else(|| type_error("a decimal string"))?;
            Decimal::parse_canonical(s, field.decimal_scale())
                .map(Value::Decimal)
                .map_err(|e| {
                    FieldError::new(&field.name, "invalid_decimal", format!("field '{}': {}", field.name, e))
                })
        }
        FieldType::Boolean => match value.as_bool() {
            Some(b) => Ok(Value::Bool(b)),
            None => Err(type_error("a boolean")),
        },
        FieldType::Datetime => {
            let s = value.as_str().ok_or_else(|| type_error("an RFC3339 datetime string"))?;
            DateTime::parse_from_rfc3339(s)
                .map(|ts| Value::DateTime(ts.with_timezone(&Utc)))
                .map_err(|_| {
                    FieldError::new(
                        &field.name,
                        "invalid_datetime",
                        format!("field '{}' expects an RFC3339 datetime", field.name),
                    )
                })
        }
        FieldType::Json => Ok(Value::Json(value.clone())),
    }
}

/// Validates a full collection definition, including per-field attribute
/// checks, declared defaults, and the field-count limit.
pub fn validate_collection_def(schema: &CollectionSchema, limits: &Limits) -> Result<()> {
    schema.validate()?;
    limits.check_field_count(schema.fields.len())?;
    for field in &schema.fields {
        if let Some(default) = &field.default {
            convert_value(field, default).map_err(|e| MoonError::Validation(e.to_string()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldDef;
    use serde_json::json;

    fn schema() -> CollectionSchema {
        let mut qty = FieldDef::new("qty", FieldType::Integer);
        qty.default = Some(json!(1));
        CollectionSchema::new(
            "products",
            vec![
                FieldDef::new("title", FieldType::String),
                FieldDef::new("price", FieldType::Decimal),
                FieldDef::new("note", FieldType::Text).nullable(),
                FieldDef::new("active", FieldType::Boolean).nullable(),
                FieldDef::new("shipped_at", FieldType::Datetime).nullable(),
                FieldDef::new("meta", FieldType::Json).nullable(),
                qty,
            ],
        )
    }

    fn obj(value: Json) -> serde_json::Map<String, Json> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_create_happy_path() {
        let schema = schema();
        let validator = Validator::new(&schema);
        let record = validator
            .validate_create(&obj(json!({
                "title": "Wireless Mouse",
                "price": "29.99",
                "active": true,
                "shipped_at": "2024-03-01T12:00:00Z",
                "meta": {"color": "black"},
            })))
            .unwrap();

        let by_name: std::collections::HashMap<_, _> =
            record.columns.iter().cloned().collect();
        assert_eq!(by_name["title"], Value::Text("Wireless Mouse".into()));
        assert_eq!(by_name["price"].to_json(), json!("29.99"));
        assert_eq!(by_name["active"], Value::Bool(true));
        // Missing nullable fields become NULL, defaults are applied.
        assert_eq!(by_name["note"], Value::Null);
        assert_eq!(by_name["qty"], Value::Int(1));
    }

    #[test]
    fn test_create_missing_required() {
        let schema = schema();
        let errors = Validator::new(&schema)
            .validate_create(&obj(json!({"price": "1.00"})))
            .unwrap_err();
        assert!(errors.iter().any(|e| e.field == "title" && e.code == "required"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let schema = schema();
        let errors = Validator::new(&schema)
            .validate_create(&obj(json!({"title": "x", "price": "1.00", "color": "red"})))
            .unwrap_err();
        assert!(errors.iter().any(|e| e.field == "color" && e.code == "unknown_field"));
    }

    #[test]
    fn test_server_fields_immutable() {
        let schema = schema();
        for key in ["id", "created_at", "updated_at"] {
            let errors = Validator::new(&schema)
                .validate_create(&obj(json!({"title": "x", "price": "1.00", key: "z"})))
                .unwrap_err();
            assert!(
                errors.iter().any(|e| e.field == key && e.code == "immutable_field"),
                "{} should be immutable",
                key
            );
        }
    }

    #[test]
    fn test_decimal_formats() {
        let schema = schema();
        let validator = Validator::new(&schema);
        for bad in ["1.999", "1e5", "", "1.", ".5", "1,000"] {
            let errors = validator
                .validate_create(&obj(json!({"title": "x", "price": bad})))
                .unwrap_err();
            assert!(
                errors.iter().any(|e| e.field == "price" && e.code == "invalid_decimal"),
                "'{}' should fail decimal validation",
                bad
            );
        }
        // Scale padding to the column scale.
        let record = validator
            .validate_create(&obj(json!({"title": "x", "price": "5"})))
            .unwrap();
        let price = record.columns.iter().find(|(n, _)| n == "price").unwrap();
        assert_eq!(price.1.to_json(), json!("5.00"));
    }

    #[test]
    fn test_numbers_rejected_for_decimal() {
        let schema = schema();
        let errors = Validator::new(&schema)
            .validate_create(&obj(json!({"title": "x", "price": 29.99})))
            .unwrap_err();
        assert!(errors.iter().any(|e| e.field == "price" && e.code == "invalid_type"));
    }

    #[test]
    fn test_integer_strictness() {
        let schema = schema();
        let validator = Validator::new(&schema);
        let errors = validator
            .validate_create(&obj(json!({"title": "x", "price": "1.00", "qty": 1.5})))
            .unwrap_err();
        assert!(errors.iter().any(|e| e.field == "qty" && e.code == "invalid_type"));

        let errors = validator
            .validate_create(&obj(json!({"title": "x", "price": "1.00", "qty": "3"})))
            .unwrap_err();
        assert!(errors.iter().any(|e| e.field == "qty"));
    }

    #[test]
    fn test_boolean_strictness() {
        let schema = schema();
        for bad in [json!(1), json!("true")] {
            let errors = Validator::new(&schema)
                .validate_create(&obj(json!({"title": "x", "price": "1.00", "active": bad})))
                .unwrap_err();
            assert!(errors.iter().any(|e| e.field == "active"));
        }
    }

    #[test]
    fn test_datetime_strictness() {
        let schema = schema();
        let errors = Validator::new(&schema)
            .validate_create(&obj(json!({"title": "x", "price": "1.00", "shipped_at": "2024-03-01"})))
            .unwrap_err();
        assert!(errors.iter().any(|e| e.field == "shipped_at" && e.code == "invalid_datetime"));
    }

    #[test]
    fn test_string_length_bound() {
        let schema = schema();
        let long = "x".repeat(256);
        let errors = Validator::new(&schema)
            .validate_create(&obj(json!({"title": long, "price": "1.00"})))
            .unwrap_err();
        assert!(errors.iter().any(|e| e.field == "title" && e.code == "too_long"));
    }

    #[test]
    fn test_null_handling() {
        let schema = schema();
        let validator = Validator::new(&schema);
        // Nullable field accepts explicit null.
        let record = validator
            .validate_create(&obj(json!({"title": "x", "price": "1.00", "note": null})))
            .unwrap();
        let note = record.columns.iter().find(|(n, _)| n == "note").unwrap();
        assert_eq!(note.1, Value::Null);

        // Non-nullable field rejects it.
        let errors = validator
            .validate_create(&obj(json!({"title": null, "price": "1.00"})))
            .unwrap_err();
        assert!(errors.iter().any(|e| e.field == "title" && e.code == "not_null"));
    }

    #[test]
    fn test_update_partial_semantics() {
        let schema = schema();
        let validator = Validator::new(&schema);
        let record = validator
            .validate_update(&obj(json!({"note": "restocked"})))
            .unwrap();
        assert_eq!(record.columns.len(), 1);

        let errors = validator.validate_update(&obj(json!({}))).unwrap_err();
        assert!(errors.iter().any(|e| e.code == "empty_update"));
    }

    #[test]
    fn test_limits_defaults() {
        let limits = Limits::default();
        assert!(limits.check_filter_count(20).is_ok());
        assert!(limits.check_filter_count(21).is_err());
        assert!(limits.check_sort_count(6).is_err());
        assert!(limits.check_batch_size(51).is_err());
        assert!(matches!(
            limits.check_batch_size(51).unwrap_err(),
            MoonError::PayloadTooLarge(_)
        ));
        assert!(limits.check_payload_bytes(2 * 1024 * 1024 + 1).is_err());
        assert!(limits.check_collection_count(1000).is_err());
        assert!(limits.check_collection_count(999).is_ok());
    }

    #[test]
    fn test_effective_limit() {
        let limits = Limits::default();
        assert_eq!(limits.effective_limit(None), 50);
        assert_eq!(limits.effective_limit(Some(10)), 10);
        assert_eq!(limits.effective_limit(Some(0)), 1);
        assert_eq!(limits.effective_limit(Some(10_000)), 1000);
    }

    #[test]
    fn test_collection_def_default_must_conform() {
        let mut bad = FieldDef::new("qty", FieldType::Integer);
        bad.default = Some(json!("not a number"));
        let schema = CollectionSchema::new("c", vec![bad]);
        assert!(validate_collection_def(&schema, &Limits::default()).is_err());
    }
}
