//! DDL building: CREATE/DROP TABLE and the portable ALTER strategies.
//!
//! DDL is the one place values are rendered into SQL text, because
//! `DEFAULT` clauses cannot be bound. Those literals come exclusively
//! from defaults that already passed type validation, and strings are
//! escaped by doubling quotes.

use moon_common::{MoonError, Result};
use moon_schema::{CollectionSchema, FieldDef, FieldType};

use crate::dialect::Dialect;

/// Renders a validated default value as a DDL literal.
fn default_literal(field: &FieldDef, value: &serde_json::Value) -> Result<String> {
    let unsupported = || {
        MoonError::Validation(format!(
            "field '{}': default not representable for {}",
            field.name, field.field_type
        ))
    };

    match field.field_type {
        FieldType::Integer => value.as_i64().map(|i| i.to_string()).ok_or_else(unsupported),
        FieldType::Float => value.as_f64().map(|f| f.to_string()).ok_or_else(unsupported),
        FieldType::Boolean => match value.as_bool() {
            // SQLite stores these as 1/0; TRUE/FALSE parse since 3.23.
            Some(true) => Ok("TRUE".to_string()),
            Some(false) => Ok("FALSE".to_string()),
            None => Err(unsupported()),
        },
        FieldType::String | FieldType::Text | FieldType::Decimal | FieldType::Datetime => {
            let text = value.as_str().ok_or_else(unsupported)?;
            Ok(quote_string_literal(text))
        }
        FieldType::Json => Err(MoonError::Validation(format!(
            "field '{}': defaults are not supported on json fields",
            field.name
        ))),
    }
}

fn quote_string_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Renders one column definition: type, nullability, default.
fn column_ddl(dialect: Dialect, field: &FieldDef) -> Result<String> {
    let mut ddl = format!(
        "{} {}",
        dialect.quote_ident(&field.name),
        dialect.ddl_type(field)
    );
    if !field.nullable {
        ddl.push_str(" NOT NULL");
    }
    if let Some(default) = &field.default {
        ddl.push_str(&format!(" DEFAULT {}", default_literal(field, default)?));
    }
    Ok(ddl)
}

/// Statements that make one column unique after it exists. SQLite has no
/// ALTER ADD CONSTRAINT, so it gets a unique index instead.
fn unique_statements(dialect: Dialect, table: &str, column: &str) -> Vec<String> {
    if dialect.supports_alter_add_unique() {
        vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            dialect.quote_ident(table),
            dialect.quote_ident(&format!("{}_{}_unique", table, column)),
            dialect.quote_ident(column)
        )]
    } else {
        vec![format!(
            "CREATE UNIQUE INDEX {} ON {} ({})",
            dialect.quote_ident(&format!("idx_{}_{}", table, column)),
            dialect.quote_ident(table),
            dialect.quote_ident(column)
        )]
    }
}

/// Builds the statements that create a collection's table: the CREATE
/// TABLE with `id` first, user columns in declared order and the
/// timestamps last, followed by one uniqueness statement per unique
/// field.
pub fn build_create_table(dialect: Dialect, schema: &CollectionSchema) -> Result<Vec<String>> {
    let mut columns: Vec<String> = Vec::with_capacity(schema.fields.len() + 3);
    columns.push(format!(
        "{} {} PRIMARY KEY",
        dialect.quote_ident("id"),
        dialect.id_type()
    ));
    for field in &schema.fields {
        columns.push(column_ddl(dialect, field)?);
    }
    columns.push(format!(
        "{} {} NOT NULL",
        dialect.quote_ident("created_at"),
        dialect.datetime_type()
    ));
    columns.push(format!(
        "{} {} NOT NULL",
        dialect.quote_ident("updated_at"),
        dialect.datetime_type()
    ));

    let mut statements = vec![format!(
        "CREATE TABLE {} ({})",
        dialect.quote_ident(&schema.name),
        columns.join(", ")
    )];
    for field in &schema.fields {
        if field.unique {
            statements.extend(unique_statements(dialect, &schema.name, &field.name));
        }
    }
    Ok(statements)
}

pub fn build_drop_table(dialect: Dialect, table: &str) -> String {
    format!("DROP TABLE {}", dialect.quote_ident(table))
}

/// Builds ADD COLUMN, splitting uniqueness into its own follow-up
/// statement. A non-nullable addition requires a default, portably:
/// SQLite rejects the statement outright and the other engines cannot
/// fill existing rows.
pub fn build_add_column(dialect: Dialect, table: &str, field: &FieldDef) -> Result<Vec<String>> {
    if !field.nullable && field.default.is_none() {
        return Err(MoonError::Validation(format!(
            "field '{}': adding a non-nullable column requires a default",
            field.name
        )));
    }

    let mut statements = vec![format!(
        "ALTER TABLE {} ADD COLUMN {}",
        dialect.quote_ident(table),
        column_ddl(dialect, field)?
    )];
    if field.unique {
        statements.extend(unique_statements(dialect, table, &field.name));
    }
    Ok(statements)
}

pub fn build_drop_column(dialect: Dialect, table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        dialect.quote_ident(table),
        dialect.quote_ident(column)
    )
}

/// Builds the dialect-native RENAME COLUMN.
pub fn build_rename_column(
    dialect: Dialect,
    table: &str,
    old_name: &str,
    new_name: &str,
) -> Result<String> {
    if !dialect.supports_rename_column() {
        return Err(MoonError::Unsupported(format!(
            "{} cannot rename columns",
            dialect
        )));
    }
    Ok(format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        dialect.quote_ident(table),
        dialect.quote_ident(old_name),
        dialect.quote_ident(new_name)
    ))
}

/// Builds MODIFY COLUMN. Postgres changes type and nullability in
/// separate statements, MySQL redefines the column in place, SQLite
/// would need a table rebuild and reports `unsupported_operation`.
pub fn build_modify_column(dialect: Dialect, table: &str, field: &FieldDef) -> Result<Vec<String>> {
    match dialect {
        Dialect::Sqlite => Err(MoonError::Unsupported(
            "sqlite cannot modify column types in place".into(),
        )),
        Dialect::Postgres => {
            let table_ident = dialect.quote_ident(table);
            let column = dialect.quote_ident(&field.name);
            let mut statements = vec![format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
                table_ident,
                column,
                dialect.ddl_type(field)
            )];
            statements.push(if field.nullable {
                format!("ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL", table_ident, column)
            } else {
                format!("ALTER TABLE {} ALTER COLUMN {} SET NOT NULL", table_ident, column)
            });
            Ok(statements)
        }
        Dialect::MySql => Ok(vec![format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            dialect.quote_ident(table),
            column_ddl(dialect, field)?
        )]),
    }
}
