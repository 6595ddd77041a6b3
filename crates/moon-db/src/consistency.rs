//! Startup consistency controller.
//!
//! Runs once per process start: enumerates non-system tables, infers
//! schemas from live column metadata and reconciles them with the
//! registry. With `auto_repair` (the default) this is also the registry
//! warm-up; without it, drift is only logged. Nothing is ever dropped
//! unless `drop_orphans` is explicitly enabled.

use std::time::Duration;

use sqlx::Row;
use tracing::{info, warn};

use moon_common::{MoonError, Result};
use moon_schema::{
    is_system_table, CollectionSchema, FieldDef, FieldType, SchemaRegistry, SYSTEM_FIELDS,
};

use crate::dialect::{field_type_from_storage, Dialect};
use crate::executor::Db;
use crate::param::SqlParam;
use crate::query::ddl::build_drop_table;
use crate::row::DbRow;

/// Configuration from the `recovery` section.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub auto_repair: bool,
    pub drop_orphans: bool,
    pub check_timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            auto_repair: true,
            drop_orphans: false,
            check_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of one consistency run, retained for the health diagnostics
/// log. Repairs are idempotent, so `ok` means "no unresolved drift".
#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    /// Tables registered (inferred) during this run.
    pub registered: Vec<String>,
    /// Orphan tables left unregistered (no auto_repair or uninferable).
    pub orphan_tables: Vec<String>,
    /// Orphan tables dropped because `drop_orphans` was enabled.
    pub dropped_tables: Vec<String>,
    /// Registry entries whose table is gone.
    pub orphan_registry: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_ok(&self) -> bool {
        self.orphan_tables.is_empty() && self.orphan_registry.is_empty()
    }

    pub fn status(&self) -> &'static str {
        if self.is_ok() {
            "ok"
        } else {
            "inconsistent"
        }
    }
}

/// Runs the consistency check, bounded by `check_timeout`.
pub async fn run(
    db: &Db,
    registry: &SchemaRegistry,
    config: &RecoveryConfig,
) -> Result<ConsistencyReport> {
    match tokio::time::timeout(config.check_timeout, reconcile(db, registry, config)).await {
        Ok(result) => result,
        Err(_) => Err(MoonError::Timeout(format!(
            "consistency check exceeded {} ms",
            config.check_timeout.as_millis()
        ))),
    }
}

async fn reconcile(
    db: &Db,
    registry: &SchemaRegistry,
    config: &RecoveryConfig,
) -> Result<ConsistencyReport> {
    let mut report = ConsistencyReport::default();
    let tables = list_tables(db).await?;

    for table in &tables {
        if registry.exists(table) {
            continue;
        }
        if !config.auto_repair {
            warn!(table = %table, "orphaned_table: present in database, missing from registry");
            report.orphan_tables.push(table.clone());
            continue;
        }
        match infer_schema(db, table).await {
            Ok(schema) => {
                info!(table = %table, fields = schema.fields.len(), "registered inferred schema");
                registry.set(schema);
                report.registered.push(table.clone());
            }
            Err(e) => {
                warn!(table = %table, error = %e, "orphaned_table: schema not inferable");
                if config.drop_orphans {
                    warn!(table = %table, "dropping orphaned table");
                    db.execute_ddl(&build_drop_table(db.dialect(), table)).await?;
                    report.dropped_tables.push(table.clone());
                } else {
                    report.orphan_tables.push(table.clone());
                }
            }
        }
    }

    for name in registry.names() {
        if tables.iter().any(|t| t == &name) {
            continue;
        }
        if config.auto_repair {
            warn!(collection = %name, "orphaned_registry: backing table missing, removing entry");
            registry.delete(&name);
        } else {
            warn!(collection = %name, "orphaned_registry: backing table missing");
            report.orphan_registry.push(name);
        }
    }

    info!(
        status = report.status(),
        registered = report.registered.len(),
        orphan_tables = report.orphan_tables.len(),
        orphan_registry = report.orphan_registry.len(),
        "consistency check finished"
    );
    Ok(report)
}

/// Enumerates user tables, excluding system and driver-internal ones.
pub async fn list_tables(db: &Db) -> Result<Vec<String>> {
    let sql = match db.dialect() {
        Dialect::Sqlite => {
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' ORDER BY name"
        }
        Dialect::Postgres => {
            "SELECT table_name AS name FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE' ORDER BY table_name"
        }
        Dialect::MySql => {
            "SELECT table_name AS name FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' ORDER BY table_name"
        }
    };

    let rows = db.fetch_all(sql, &[]).await?;
    let mut tables = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = match &row {
            DbRow::Sqlite(r) => r.try_get("name"),
            DbRow::Postgres(r) => r.try_get("name"),
            DbRow::MySql(r) => r.try_get("name"),
        }
        .map_err(|e| MoonError::Database(format!("table enumeration failed: {}", e)))?;
        if !is_system_table(&name) {
            tables.push(name);
        }
    }
    Ok(tables)
}

/// One introspected column, normalized across dialects.
#[derive(Debug, Clone)]
struct RawColumn {
    name: String,
    declared_type: String,
    nullable: bool,
    max_length: Option<u32>,
    numeric_scale: Option<u32>,
    unique: bool,
}

/// Infers a collection schema from live column metadata. Fails when a
/// column type has no field-type counterpart or the table lacks the
/// implicit system columns.
pub async fn infer_schema(db: &Db, table: &str) -> Result<CollectionSchema> {
    moon_schema::validate_identifier(table)?;
    let columns = match db.dialect() {
        Dialect::Sqlite => introspect_sqlite(db, table).await?,
        Dialect::Postgres => introspect_postgres(db, table).await?,
        Dialect::MySql => introspect_mysql(db, table).await?,
    };

    for required in SYSTEM_FIELDS {
        if !columns.iter().any(|c| &c.name == required) {
            return Err(MoonError::Unsupported(format!(
                "table '{}' lacks the '{}' column",
                table, required
            )));
        }
    }

    let mut fields = Vec::new();
    for column in &columns {
        if SYSTEM_FIELDS.contains(&column.name.as_str()) {
            continue;
        }
        let (field_type, inferred_len, inferred_scale) =
            field_type_from_storage(&column.declared_type).ok_or_else(|| {
                MoonError::Unsupported(format!(
                    "table '{}': column '{}' has unmappable type '{}'",
                    table, column.name, column.declared_type
                ))
            })?;

        let mut field = FieldDef::new(&column.name, field_type);
        field.nullable = column.nullable;
        field.unique = column.unique;
        if field_type == FieldType::String {
            field.max_length = column.max_length.or(inferred_len);
        }
        if field_type == FieldType::Decimal {
            field.scale = column.numeric_scale.or(inferred_scale);
        }
        fields.push(field);
    }

    if fields.is_empty() {
        return Err(MoonError::Unsupported(format!(
            "table '{}' has no user columns",
            table
        )));
    }

    Ok(CollectionSchema::new(table, fields))
}

async fn introspect_sqlite(db: &Db, table: &str) -> Result<Vec<RawColumn>> {
    let quoted = db.dialect().quote_ident(table);
    let rows = db
        .fetch_all(&format!("PRAGMA table_info({})", quoted), &[])
        .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let DbRow::Sqlite(r) = row else {
            return Err(MoonError::Internal("sqlite row expected".into()));
        };
        let name: String = r.try_get("name").map_err(introspect_error)?;
        let declared_type: String = r.try_get("type").map_err(introspect_error)?;
        let notnull: i64 = r.try_get("notnull").map_err(introspect_error)?;
        columns.push(RawColumn {
            name,
            declared_type,
            nullable: notnull == 0,
            max_length: None,
            numeric_scale: None,
            unique: false,
        });
    }

    // Single-column unique indexes mark their column unique.
    let indexes = db
        .fetch_all(&format!("PRAGMA index_list({})", quoted), &[])
        .await?;
    for row in &indexes {
        let DbRow::Sqlite(r) = row else { continue };
        let is_unique: i64 = r.try_get("unique").map_err(introspect_error)?;
        let origin: String = r.try_get("origin").map_err(introspect_error)?;
        if is_unique == 0 || origin == "pk" {
            continue;
        }
        let index_name: String = r.try_get("name").map_err(introspect_error)?;
        let members = db
            .fetch_all(
                &format!("PRAGMA index_info({})", db.dialect().quote_ident(&index_name)),
                &[],
            )
            .await?;
        if members.len() != 1 {
            continue;
        }
        let DbRow::Sqlite(member) = &members[0] else { continue };
        let column_name: String = member.try_get("name").map_err(introspect_error)?;
        if let Some(column) = columns.iter_mut().find(|c| c.name == column_name) {
            column.unique = true;
        }
    }

    Ok(columns)
}

async fn introspect_postgres(db: &Db, table: &str) -> Result<Vec<RawColumn>> {
    let sql = "SELECT column_name, data_type, is_nullable, \
               CAST(character_maximum_length AS BIGINT) AS char_len, \
               CAST(numeric_scale AS BIGINT) AS num_scale \
               FROM information_schema.columns \
               WHERE table_schema = 'public' AND table_name = $1 \
               ORDER BY ordinal_position";
    let rows = db.fetch_all(sql, &[SqlParam::Text(table.to_string())]).await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let DbRow::Postgres(r) = row else {
            return Err(MoonError::Internal("postgres row expected".into()));
        };
        let name: String = r.try_get("column_name").map_err(introspect_error)?;
        let declared_type: String = r.try_get("data_type").map_err(introspect_error)?;
        let is_nullable: String = r.try_get("is_nullable").map_err(introspect_error)?;
        let char_len: Option<i64> = r.try_get("char_len").map_err(introspect_error)?;
        let num_scale: Option<i64> = r.try_get("num_scale").map_err(introspect_error)?;
        columns.push(RawColumn {
            name,
            declared_type,
            nullable: is_nullable == "YES",
            max_length: char_len.and_then(|v| u32::try_from(v).ok()),
            numeric_scale: num_scale.and_then(|v| u32::try_from(v).ok()),
            unique: false,
        });
    }

    let unique_sql = "SELECT kcu.column_name \
                      FROM information_schema.table_constraints tc \
                      JOIN information_schema.key_column_usage kcu \
                        ON tc.constraint_name = kcu.constraint_name \
                       AND tc.table_schema = kcu.table_schema \
                      WHERE tc.table_schema = 'public' AND tc.table_name = $1 \
                        AND tc.constraint_type = 'UNIQUE'";
    let rows = db
        .fetch_all(unique_sql, &[SqlParam::Text(table.to_string())])
        .await?;
    for row in &rows {
        let DbRow::Postgres(r) = row else { continue };
        let column_name: String = r.try_get("column_name").map_err(introspect_error)?;
        if let Some(column) = columns.iter_mut().find(|c| c.name == column_name) {
            column.unique = true;
        }
    }

    Ok(columns)
}

async fn introspect_mysql(db: &Db, table: &str) -> Result<Vec<RawColumn>> {
    let sql = "SELECT column_name AS column_name, column_type AS column_type, \
               is_nullable AS is_nullable, \
               CAST(character_maximum_length AS SIGNED) AS char_len, \
               CAST(numeric_scale AS SIGNED) AS num_scale, \
               column_key AS column_key \
               FROM information_schema.columns \
               WHERE table_schema = DATABASE() AND table_name = ? \
               ORDER BY ordinal_position";
    let rows = db.fetch_all(sql, &[SqlParam::Text(table.to_string())]).await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let DbRow::MySql(r) = row else {
            return Err(MoonError::Internal("mysql row expected".into()));
        };
        let name: String = r.try_get("column_name").map_err(introspect_error)?;
        let declared_type: String = r.try_get("column_type").map_err(introspect_error)?;
        let is_nullable: String = r.try_get("is_nullable").map_err(introspect_error)?;
        let char_len: Option<i64> = r.try_get("char_len").map_err(introspect_error)?;
        let num_scale: Option<i64> = r.try_get("num_scale").map_err(introspect_error)?;
        let column_key: String = r.try_get("column_key").map_err(introspect_error)?;
        columns.push(RawColumn {
            name,
            declared_type,
            nullable: is_nullable == "YES",
            max_length: char_len.and_then(|v| u32::try_from(v).ok()),
            numeric_scale: num_scale.and_then(|v| u32::try_from(v).ok()),
            unique: column_key == "UNI",
        });
    }

    Ok(columns)
}

fn introspect_error(err: sqlx::Error) -> MoonError {
    MoonError::Database(format!("introspection decode failed: {}", err))
}
