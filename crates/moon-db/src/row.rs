//! Dynamic row scanning.
//!
//! Rows come back from three different drivers; the scanner turns them
//! into uniformly typed `Value`s by consulting the collection schema for
//! each column's declared type. This is where the wire contract is
//! enforced: booleans are booleans even when the engine stored an
//! integer, decimals come back as canonical fixed-scale strings, and
//! datetimes are RFC3339 UTC.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use moon_common::{MoonError, Result};
use moon_schema::{CollectionSchema, Decimal, FieldType, Value, DEFAULT_DECIMAL_SCALE, MAX_DECIMAL_SCALE};

/// One fetched row, still driver-shaped.
pub enum DbRow {
    Sqlite(SqliteRow),
    Postgres(PgRow),
    MySql(MySqlRow),
}

/// What an aggregate query yields, decided by the builder so the scanner
/// decodes a deterministic wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum AggOutput {
    /// `COUNT(*)`: always an integer.
    Count,
    /// MIN/MAX over integer columns; NULL on an empty set.
    Int,
    /// Numeric aggregates over integer/float columns, cast to double.
    Double,
    /// Aggregates over decimal columns, rendered at the column scale.
    Decimal(u32),
    /// MIN/MAX over datetime columns.
    DateTime,
    /// MIN/MAX over string/text columns.
    Text,
}

/// Scans the named columns of a row into a JSON object using the
/// collection schema for typing.
pub fn scan_record(
    row: &DbRow,
    schema: &CollectionSchema,
    columns: &[String],
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut record = serde_json::Map::with_capacity(columns.len());
    for name in columns {
        let value = scan_column(row, schema, name)?;
        record.insert(name.clone(), value.to_json());
    }
    Ok(record)
}

/// Scans one column into a typed value.
pub fn scan_column(row: &DbRow, schema: &CollectionSchema, name: &str) -> Result<Value> {
    let field_type = schema.column_type(name).ok_or_else(|| {
        MoonError::Internal(format!(
            "column '{}' is not part of collection '{}'",
            name, schema.name
        ))
    })?;
    let scale = schema
        .field(name)
        .map(|f| f.decimal_scale())
        .unwrap_or(DEFAULT_DECIMAL_SCALE);

    match row {
        DbRow::Sqlite(r) => scan_sqlite(r, name, field_type, scale),
        DbRow::Postgres(r) => scan_postgres(r, name, field_type, scale),
        DbRow::MySql(r) => scan_mysql(r, name, field_type, scale),
    }
}

/// Scans the `id` column of a row.
pub fn scan_id(row: &DbRow) -> Result<String> {
    let value = match row {
        DbRow::Sqlite(r) => r.try_get::<String, _>("id"),
        DbRow::Postgres(r) => r.try_get::<String, _>("id"),
        DbRow::MySql(r) => r.try_get::<String, _>("id"),
    };
    value.map_err(decode_error)
}

/// Scans the single `value` column of an aggregate query.
pub fn scan_aggregate(row: &DbRow, output: &AggOutput) -> Result<serde_json::Value> {
    match output {
        AggOutput::Count => {
            let count: i64 = match row {
                DbRow::Sqlite(r) => r.try_get("value"),
                DbRow::Postgres(r) => r.try_get("value"),
                DbRow::MySql(r) => r.try_get("value"),
            }
            .map_err(decode_error)?;
            Ok(serde_json::json!(count))
        }
        AggOutput::Int => {
            let value: Option<i64> = match row {
                DbRow::Sqlite(r) => r.try_get("value"),
                DbRow::Postgres(r) => r.try_get("value"),
                DbRow::MySql(r) => r.try_get("value"),
            }
            .map_err(decode_error)?;
            Ok(value.map(|v| serde_json::json!(v)).unwrap_or(serde_json::Value::Null))
        }
        AggOutput::Double => {
            let value: Option<f64> = match row {
                DbRow::Sqlite(r) => r.try_get("value"),
                DbRow::Postgres(r) => r.try_get("value"),
                DbRow::MySql(r) => r.try_get("value"),
            }
            .map_err(decode_error)?;
            Ok(value.map(|v| serde_json::json!(v)).unwrap_or(serde_json::Value::Null))
        }
        AggOutput::Decimal(scale) => {
            let value = match row {
                DbRow::Sqlite(r) => scan_sqlite(r, "value", FieldType::Decimal, *scale)?,
                DbRow::Postgres(r) => scan_postgres(r, "value", FieldType::Decimal, *scale)?,
                DbRow::MySql(r) => scan_mysql(r, "value", FieldType::Decimal, *scale)?,
            };
            Ok(value.to_json())
        }
        AggOutput::DateTime => {
            let value = match row {
                DbRow::Sqlite(r) => scan_sqlite(r, "value", FieldType::Datetime, 0)?,
                DbRow::Postgres(r) => scan_postgres(r, "value", FieldType::Datetime, 0)?,
                DbRow::MySql(r) => scan_mysql(r, "value", FieldType::Datetime, 0)?,
            };
            Ok(value.to_json())
        }
        AggOutput::Text => {
            let value: Option<String> = match row {
                DbRow::Sqlite(r) => r.try_get("value"),
                DbRow::Postgres(r) => r.try_get("value"),
                DbRow::MySql(r) => r.try_get("value"),
            }
            .map_err(decode_error)?;
            Ok(value.map(serde_json::Value::String).unwrap_or(serde_json::Value::Null))
        }
    }
}

fn decode_error(err: sqlx::Error) -> MoonError {
    MoonError::Database(format!("row decode failed: {}", err))
}

/// Re-canonicalizes a decimal read back as text. Legacy rows written at a
/// different scale keep their own scale rather than failing the read.
fn decimal_from_text(text: &str, scale: u32) -> Result<Value> {
    let parsed = Decimal::parse(text, MAX_DECIMAL_SCALE)
        .map_err(|e| MoonError::Database(format!("undecodable decimal '{}': {}", text, e)))?;
    Ok(Value::Decimal(parsed.rescale(scale).unwrap_or(parsed)))
}

fn datetime_from_text(text: &str) -> Result<Value> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(Value::DateTime(ts.with_timezone(&Utc)));
    }
    // Space-separated form written by other tooling.
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| Value::DateTime(Utc.from_utc_datetime(&naive)))
        .map_err(|_| MoonError::Database(format!("undecodable datetime '{}'", text)))
}

/// SQLite stores through type affinity: the same declared column can hold
/// TEXT, REAL or INTEGER depending on what round-trips. Scanning goes
/// through the raw value so each cell is read by its actual storage
/// class, with SQLite's own text rendering recovering decimal literals
/// the engine chose to store numerically.
fn scan_sqlite(row: &SqliteRow, name: &str, field_type: FieldType, scale: u32) -> Result<Value> {
    use sqlx::{Decode, ValueRef as _};

    let raw = row.try_get_raw(name).map_err(decode_error)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    fn decode<'r, T: Decode<'r, sqlx::Sqlite>>(
        raw: sqlx::sqlite::SqliteValueRef<'r>,
        name: &str,
    ) -> Result<T> {
        T::decode(raw).map_err(|e| {
            MoonError::Database(format!("column '{}' decode failed: {}", name, e))
        })
    }

    match field_type {
        FieldType::String | FieldType::Text => Ok(Value::Text(decode::<String>(raw, name)?)),
        FieldType::Integer => Ok(Value::Int(decode::<i64>(raw, name)?)),
        FieldType::Float => Ok(Value::Float(decode::<f64>(raw, name)?)),
        FieldType::Boolean => Ok(Value::Bool(decode::<bool>(raw, name)?)),
        FieldType::Decimal => {
            let text = decode::<String>(raw, name)?;
            decimal_from_text(&text, scale)
        }
        FieldType::Datetime => {
            let text = decode::<String>(raw, name)?;
            datetime_from_text(&text)
        }
        FieldType::Json => {
            let text = decode::<String>(raw, name)?;
            serde_json::from_str(&text)
                .map(Value::Json)
                .map_err(|e| MoonError::Database(format!("undecodable json: {}", e)))
        }
    }
}

fn scan_postgres(row: &PgRow, name: &str, field_type: FieldType, scale: u32) -> Result<Value> {
    match field_type {
        FieldType::String | FieldType::Text => Ok(row
            .try_get::<Option<String>, _>(name)
            .map_err(decode_error)?
            .map(Value::Text)
            .unwrap_or(Value::Null)),
        FieldType::Integer => Ok(row
            .try_get::<Option<i64>, _>(name)
            .map_err(decode_error)?
            .map(Value::Int)
            .unwrap_or(Value::Null)),
        FieldType::Float => Ok(row
            .try_get::<Option<f64>, _>(name)
            .map_err(decode_error)?
            .map(Value::Float)
            .unwrap_or(Value::Null)),
        FieldType::Boolean => Ok(row
            .try_get::<Option<bool>, _>(name)
            .map_err(decode_error)?
            .map(Value::Bool)
            .unwrap_or(Value::Null)),
        FieldType::Decimal => {
            let value: Option<rust_decimal::Decimal> =
                row.try_get(name).map_err(decode_error)?;
            match value {
                None => Ok(Value::Null),
                Some(d) => decimal_from_text(&d.to_string(), scale),
            }
        }
        FieldType::Datetime => Ok(row
            .try_get::<Option<DateTime<Utc>>, _>(name)
            .map_err(decode_error)?
            .map(Value::DateTime)
            .unwrap_or(Value::Null)),
        FieldType::Json => Ok(row
            .try_get::<Option<serde_json::Value>, _>(name)
            .map_err(decode_error)?
            .map(Value::Json)
            .unwrap_or(Value::Null)),
    }
}

fn scan_mysql(row: &MySqlRow, name: &str, field_type: FieldType, scale: u32) -> Result<Value> {
    match field_type {
        FieldType::String | FieldType::Text => Ok(row
            .try_get::<Option<String>, _>(name)
            .map_err(decode_error)?
            .map(Value::Text)
            .unwrap_or(Value::Null)),
        FieldType::Integer => Ok(row
            .try_get::<Option<i64>, _>(name)
            .map_err(decode_error)?
            .map(Value::Int)
            .unwrap_or(Value::Null)),
        FieldType::Float => Ok(row
            .try_get::<Option<f64>, _>(name)
            .map_err(decode_error)?
            .map(Value::Float)
            .unwrap_or(Value::Null)),
        FieldType::Boolean => Ok(row
            .try_get::<Option<bool>, _>(name)
            .map_err(decode_error)?
            .map(Value::Bool)
            .unwrap_or(Value::Null)),
        FieldType::Decimal => {
            let value: Option<rust_decimal::Decimal> =
                row.try_get(name).map_err(decode_error)?;
            match value {
                None => Ok(Value::Null),
                Some(d) => decimal_from_text(&d.to_string(), scale),
            }
        }
        FieldType::Datetime => Ok(row
            .try_get::<Option<NaiveDateTime>, _>(name)
            .map_err(decode_error)?
            .map(|naive| Value::DateTime(Utc.from_utc_datetime(&naive)))
            .unwrap_or(Value::Null)),
        FieldType::Json => Ok(row
            .try_get::<Option<serde_json::Value>, _>(name)
            .map_err(decode_error)?
            .map(Value::Json)
            .unwrap_or(Value::Null)),
    }
}
