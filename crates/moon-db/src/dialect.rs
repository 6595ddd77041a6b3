//! Dialect drivers.
//!
//! Every portability concern lives here: identifier quoting, placeholder
//! style, the field-type → storage-type map and its inverse, ALTER
//! capabilities, and driver error classification. Handlers and the query
//! builder never branch on the engine anywhere else.

use moon_common::{MoonError, Result};
use moon_schema::{FieldDef, FieldType};

/// The supported relational engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }

    /// Parses the `database.connection` config value.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            other => Err(MoonError::Validation(format!(
                "unknown database connection '{}' (expected sqlite, postgres or mysql)",
                other
            ))),
        }
    }

    /// Quotes an identifier. Callers must have validated the name against
    /// the identifier regex; quoting is belt only, not the suspenders.
    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", name),
            _ => format!("\"{}\"", name),
        }
    }

    /// Placeholder for the n-th parameter (1-based).
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", n),
            _ => "?".to_string(),
        }
    }

    /// Storage DDL type for a user field.
    pub fn ddl_type(&self, field: &FieldDef) -> String {
        match field.field_type {
            FieldType::String => format!("VARCHAR({})", field.string_length()),
            FieldType::Text => "TEXT".to_string(),
            FieldType::Integer => match self {
                Dialect::Sqlite => "INTEGER".to_string(),
                _ => "BIGINT".to_string(),
            },
            FieldType::Float => match self {
                Dialect::Sqlite => "REAL".to_string(),
                Dialect::Postgres => "DOUBLE PRECISION".to_string(),
                Dialect::MySql => "DOUBLE".to_string(),
            },
            FieldType::Decimal => format!("NUMERIC(19, {})", field.decimal_scale()),
            FieldType::Boolean => "BOOLEAN".to_string(),
            FieldType::Datetime => self.datetime_type().to_string(),
            FieldType::Json => match self {
                Dialect::Postgres => "JSONB".to_string(),
                _ => "JSON".to_string(),
            },
        }
    }

    /// Storage type for the implicit timestamp columns.
    pub fn datetime_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "DATETIME",
            Dialect::Postgres => "TIMESTAMPTZ",
            Dialect::MySql => "DATETIME(6)",
        }
    }

    /// Storage type for the `id` primary key (26-char ULID).
    pub fn id_type(&self) -> &'static str {
        "VARCHAR(26)"
    }

    /// Whether `ALTER TABLE … ADD CONSTRAINT … UNIQUE` is available.
    /// SQLite expresses uniqueness through `CREATE UNIQUE INDEX` instead.
    pub fn supports_alter_add_unique(&self) -> bool {
        !matches!(self, Dialect::Sqlite)
    }

    /// Whether column types can be changed in place.
    pub fn supports_alter_modify_column(&self) -> bool {
        !matches!(self, Dialect::Sqlite)
    }

    /// Native RENAME COLUMN is available on all supported engines.
    pub fn supports_rename_column(&self) -> bool {
        true
    }

    /// Whether DDL participates in transactions. MySQL commits implicitly
    /// around each DDL statement.
    pub fn supports_transactional_ddl(&self) -> bool {
        !matches!(self, Dialect::MySql)
    }

    pub fn supports_multi_row_insert(&self) -> bool {
        true
    }

    /// Wraps an expression so it compares numerically. SQLite decimal
    /// columns hold TEXT or REAL depending on what round-tripped at
    /// insert, and bare storage classes order TEXT after every number;
    /// casting both sides to REAL restores numeric comparison. Other
    /// dialects compare NUMERIC natively.
    pub fn comparable_expr(&self, expr: &str, field_type: FieldType) -> String {
        if matches!(self, Dialect::Sqlite) && field_type == FieldType::Decimal {
            format!("CAST({} AS REAL)", expr)
        } else {
            expr.to_string()
        }
    }

    /// SQL cast target that makes int/float aggregates arrive as doubles.
    pub fn double_cast(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "REAL",
            Dialect::Postgres => "DOUBLE PRECISION",
            Dialect::MySql => "DOUBLE",
        }
    }

    /// SQL cast target for decimal aggregates at a given scale.
    pub fn decimal_cast(&self, scale: u32) -> String {
        match self {
            Dialect::Sqlite => "NUMERIC".to_string(),
            _ => format!("NUMERIC(38, {})", scale),
        }
    }

    /// Maps a driver error onto the moon error model. Constraint and
    /// connection classes get their own kinds; everything else stays a
    /// dialect-internal error surfaced generically.
    pub fn classify_sqlx(&self, err: sqlx::Error) -> MoonError {
        match &err {
            sqlx::Error::RowNotFound => MoonError::NotFound("row not found".into()),
            sqlx::Error::PoolTimedOut => {
                MoonError::Unavailable("connection pool timed out".into())
            }
            sqlx::Error::PoolClosed => MoonError::Unavailable("connection pool closed".into()),
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => {
                MoonError::Unavailable(err.to_string())
            }
            sqlx::Error::Configuration(_) => MoonError::Unavailable(err.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
                let message = db_err.message().to_string();
                if self.is_duplicate(&code, &message) {
                    MoonError::Conflict(message)
                } else if is_connection_message(&message) {
                    MoonError::Unavailable(message)
                } else {
                    MoonError::Database(message)
                }
            }
            _ => {
                let message = err.to_string();
                if is_connection_message(&message) {
                    MoonError::Unavailable(message)
                } else {
                    MoonError::Database(message)
                }
            }
        }
    }

    /// Duplicate/unique-violation detection per engine.
    fn is_duplicate(&self, code: &str, message: &str) -> bool {
        let by_code = match self {
            // SQLITE_CONSTRAINT_UNIQUE / SQLITE_CONSTRAINT_PRIMARYKEY
            Dialect::Sqlite => code == "2067" || code == "1555",
            Dialect::Postgres => code == "23505",
            // ER_DUP_ENTRY carries SQLSTATE 23000
            Dialect::MySql => code == "23000",
        };
        by_code
            || message.contains("UNIQUE constraint failed")
            || message.contains("duplicate key value")
            || message.contains("Duplicate entry")
            || message.to_ascii_lowercase().contains("unique constraint")
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection-class failure patterns shared by the three drivers.
fn is_connection_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("no such host")
        || lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("broken pipe")
}

/// Reverse type mapping: a declared storage type back to a field type.
/// Used by the consistency controller when inferring orphan tables. The
/// input is the dialect's reported type, upper-cased, parens included.
pub fn field_type_from_storage(declared: &str) -> Option<(FieldType, Option<u32>, Option<u32>)> {
    let upper = declared.trim().to_ascii_uppercase();
    let base: &str = upper.split('(').next().unwrap_or("").trim();
    let args: Vec<u32> = upper
        .split('(')
        .nth(1)
        .map(|rest| {
            rest.trim_end_matches(')')
                .split(',')
                .filter_map(|p| p.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();

    match base {
        "VARCHAR" | "CHARACTER VARYING" | "NVARCHAR" => {
            Some((FieldType::String, args.first().copied(), None))
        }
        "TEXT" | "LONGTEXT" | "MEDIUMTEXT" | "CLOB" => Some((FieldType::Text, None, None)),
        "INTEGER" | "INT" | "BIGINT" | "SMALLINT" => Some((FieldType::Integer, None, None)),
        "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" => Some((FieldType::Float, None, None)),
        "NUMERIC" | "DECIMAL" => Some((FieldType::Decimal, None, args.get(1).copied())),
        "BOOLEAN" | "BOOL" => Some((FieldType::Boolean, None, None)),
        "TINYINT" => {
            // MySQL BOOLEAN arrives as TINYINT(1).
            if args.first() == Some(&1) {
                Some((FieldType::Boolean, None, None))
            } else {
                Some((FieldType::Integer, None, None))
            }
        }
        "DATETIME" | "TIMESTAMP" | "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE"
        | "TIMESTAMP WITHOUT TIME ZONE" => Some((FieldType::Datetime, None, None)),
        "JSON" | "JSONB" => Some((FieldType::Json, None, None)),
        _ => None,
    }
}
