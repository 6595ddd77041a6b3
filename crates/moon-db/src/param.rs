//! Bind parameters.
//!
//! `SqlParam` is the single currency between the query builder and the
//! drivers. NULLs carry their field type so the Postgres wire protocol
//! sees a correctly typed parameter; SQLite and MySQL ignore it.

use chrono::{DateTime, SecondsFormat, Utc};
use moon_common::{MoonError, Result};
use moon_schema::{FieldType, Value};
use sqlx::mysql::{MySql, MySqlArguments};
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use std::str::FromStr;

/// One bind parameter, typed for portable encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null(FieldType),
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Canonical fixed-scale decimal string.
    Decimal(String),
    DateTime(DateTime<Utc>),
    Json(serde_json::Value),
    Text(String),
}

impl SqlParam {
    /// Converts a typed cell value into a bind parameter. The field type
    /// disambiguates NULLs.
    pub fn from_value(value: &Value, field_type: FieldType) -> SqlParam {
        match value {
            Value::Null => SqlParam::Null(field_type),
            Value::Bool(b) => SqlParam::Bool(*b),
            Value::Int(i) => SqlParam::Int(*i),
            Value::Float(f) => SqlParam::Float(*f),
            Value::Decimal(d) => SqlParam::Decimal(d.to_string()),
            Value::DateTime(ts) => SqlParam::DateTime(*ts),
            Value::Json(v) => SqlParam::Json(v.clone()),
            Value::Text(s) => SqlParam::Text(s.clone()),
        }
    }

    fn decimal(text: &str) -> Result<rust_decimal::Decimal> {
        rust_decimal::Decimal::from_str(text)
            .map_err(|e| MoonError::Internal(format!("unencodable decimal '{}': {}", text, e)))
    }

    fn rfc3339(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// Binds parameters onto a SQLite query. Everything is stored through
/// SQLite's five storage classes; decimals, datetimes and JSON travel as
/// text.
pub fn bind_sqlite<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[SqlParam],
) -> Result<Query<'q, Sqlite, SqliteArguments<'q>>> {
    for param in params {
        query = match param {
            SqlParam::Null(_) => query.bind(Option::<String>::None),
            SqlParam::Bool(b) => query.bind(*b),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Float(f) => query.bind(*f),
            SqlParam::Decimal(s) => query.bind(s.clone()),
            SqlParam::DateTime(ts) => query.bind(SqlParam::rfc3339(ts)),
            SqlParam::Json(v) => query.bind(v.to_string()),
            SqlParam::Text(s) => query.bind(s.clone()),
        };
    }
    Ok(query)
}

/// Binds parameters onto a Postgres query with full wire typing.
pub fn bind_postgres<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlParam],
) -> Result<Query<'q, Postgres, PgArguments>> {
    for param in params {
        query = match param {
            SqlParam::Null(ft) => match ft {
                FieldType::Integer => query.bind(Option::<i64>::None),
                FieldType::Float => query.bind(Option::<f64>::None),
                FieldType::Decimal => query.bind(Option::<rust_decimal::Decimal>::None),
                FieldType::Boolean => query.bind(Option::<bool>::None),
                FieldType::Datetime => query.bind(Option::<DateTime<Utc>>::None),
                FieldType::Json => query.bind(Option::<serde_json::Value>::None),
                FieldType::String | FieldType::Text => query.bind(Option::<String>::None),
            },
            SqlParam::Bool(b) => query.bind(*b),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Float(f) => query.bind(*f),
            SqlParam::Decimal(s) => query.bind(SqlParam::decimal(s)?),
            SqlParam::DateTime(ts) => query.bind(*ts),
            SqlParam::Json(v) => query.bind(v.clone()),
            SqlParam::Text(s) => query.bind(s.clone()),
        };
    }
    Ok(query)
}

/// Binds parameters onto a MySQL query. Datetimes travel as naive UTC,
/// matching the `DATETIME(6)` column type.
pub fn bind_mysql<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &[SqlParam],
) -> Result<Query<'q, MySql, MySqlArguments>> {
    for param in params {
        query = match param {
            SqlParam::Null(ft) => match ft {
                FieldType::Integer => query.bind(Option::<i64>::None),
                FieldType::Float => query.bind(Option::<f64>::None),
                FieldType::Decimal => query.bind(Option::<rust_decimal::Decimal>::None),
                FieldType::Boolean => query.bind(Option::<bool>::None),
                FieldType::Datetime => query.bind(Option::<chrono::NaiveDateTime>::None),
                FieldType::Json => query.bind(Option::<serde_json::Value>::None),
                FieldType::String | FieldType::Text => query.bind(Option::<String>::None),
            },
            SqlParam::Bool(b) => query.bind(*b),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Float(f) => query.bind(*f),
            SqlParam::Decimal(s) => query.bind(SqlParam::decimal(s)?),
            SqlParam::DateTime(ts) => query.bind(ts.naive_utc()),
            SqlParam::Json(v) => query.bind(v.clone()),
            SqlParam::Text(s) => query.bind(s.clone()),
        };
    }
    Ok(query)
}
