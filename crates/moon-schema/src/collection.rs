//! Collection schema model.
//!
//! A collection owns an ordered list of user fields; `id`, `created_at`
//! and `updated_at` are implicit and server-maintained. The reserved
//! `moon_*` tables are invisible to the collection APIs.

use moon_common::{MoonError, Result};
use serde::{Deserialize, Serialize};

use crate::field::{validate_identifier, FieldDef, FieldType};

/// Implicit server-maintained fields, in column order.
pub const SYSTEM_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

/// Reserved system table names, hidden from collection APIs.
pub const SYSTEM_TABLES: &[&str] = &[
    "moon_users",
    "moon_refresh_tokens",
    "moon_apikeys",
    "moon_blacklisted_tokens",
];

/// Returns true for reserved system table names.
pub fn is_system_table(name: &str) -> bool {
    SYSTEM_TABLES.contains(&name)
}

/// Returns true for the implicit server-maintained field names.
pub fn is_system_field(name: &str) -> bool {
    SYSTEM_FIELDS.contains(&name)
}

/// One collection: a case-sensitive name plus its ordered user fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self { name: name.into(), fields }
    }

    /// Checks the structural invariants of a collection definition:
    /// valid identifiers, at least one user field, unique field names, no
    /// user field shadowing a system field, no reserved table name.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.name)?;
        if is_system_table(&self.name) {
            return Err(MoonError::Validation(format!(
                "'{}' is a reserved system table name",
                self.name
            )));
        }
        if self.fields.is_empty() {
            return Err(MoonError::Validation(
                "a collection requires at least one field".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            field.validate()?;
            if is_system_field(&field.name) {
                return Err(MoonError::Validation(format!(
                    "field '{}' is reserved and maintained by the server",
                    field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(MoonError::Validation(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Looks up a user field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some() || is_system_field(name)
    }

    /// Field type for any addressable column, including system columns.
    pub fn column_type(&self, name: &str) -> Option<FieldType> {
        match name {
            "id" => Some(FieldType::String),
            "created_at" | "updated_at" => Some(FieldType::Datetime),
            _ => self.field(name).map(|f| f.field_type),
        }
    }

    /// All column names in storage order: `id`, user fields, timestamps.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.fields.len() + 3);
        names.push("id".to_string());
        names.extend(self.fields.iter().map(|f| f.name.clone()));
        names.push("created_at".to_string());
        names.push("updated_at".to_string());
        names
    }

    /// User field count (system fields excluded).
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Fields included in the `?q=` LIKE search.
    pub fn searchable_fields(&self) -> Vec<&FieldDef> {
        self.fields.iter().filter(|f| f.field_type.is_searchable()).collect()
    }

    /// The `:schema` endpoint body, minus the record count the handler
    /// adds from a live query.
    pub fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "collection": self.name,
            "fields": self.fields,
            "primary_key": "id",
        })
    }
}
