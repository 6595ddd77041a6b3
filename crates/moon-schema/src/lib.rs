//! Schema model for the moon data backend.
//!
//! Collections are defined at runtime by operators; this crate owns the
//! in-memory model of those definitions and everything that derives from
//! it without touching a database:
//!
//! - Field and collection definitions with their structural invariants
//! - The concurrent schema registry consulted on every request
//! - Payload validation against a collection entry, with structured
//!   per-field errors and the global request limits
//! - The exact fixed-scale decimal type used for `decimal` columns
//! - The tagged row value union produced by the dynamic scanner
//!
//! Nothing here performs I/O; `moon-db` maps this model onto concrete SQL
//! dialects and `moon-api` exposes it over HTTP.

pub mod collection;
pub mod decimal;
pub mod field;
pub mod registry;
pub mod validate;
pub mod value;

pub use collection::{
    is_system_field, is_system_table, CollectionSchema, SYSTEM_FIELDS, SYSTEM_TABLES,
};
pub use decimal::{Decimal, DecimalError, DEFAULT_DECIMAL_SCALE, MAX_DECIMAL_SCALE};
pub use field::{validate_identifier, FieldDef, FieldType, DEFAULT_STRING_LENGTH};
pub use registry::SchemaRegistry;
pub use validate::{convert_value, validate_collection_def, Limits, ValidatedRecord, Validator};
pub use value::Value;

/// Generates a fresh record id: 26 Crockford-base32 chars, time-ordered.
pub fn new_record_id() -> String {
    ulid::Ulid::new().to_string()
}
