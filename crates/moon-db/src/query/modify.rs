//! INSERT, UPDATE and DELETE building.

use moon_common::{MoonError, Result};

use crate::dialect::Dialect;
use crate::param::SqlParam;

/// Builds a (possibly multi-row) INSERT. Every row must bind the same
/// column set; the handler guarantees that by validating against the full
/// field list.
pub fn build_insert(
    dialect: Dialect,
    table: &str,
    columns: &[String],
    rows: Vec<Vec<SqlParam>>,
) -> Result<(String, Vec<SqlParam>)> {
    if columns.is_empty() || rows.is_empty() {
        return Err(MoonError::Internal("insert with no columns or rows".into()));
    }

    let column_list: Vec<String> = columns.iter().map(|c| dialect.quote_ident(c)).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ",
        dialect.quote_ident(table),
        column_list.join(", ")
    );

    let mut params: Vec<SqlParam> = Vec::with_capacity(columns.len() * rows.len());
    let mut tuples: Vec<String> = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != columns.len() {
            return Err(MoonError::Internal(format!(
                "insert row binds {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }
        let placeholders: Vec<String> = row
            .into_iter()
            .map(|param| {
                params.push(param);
                dialect.placeholder(params.len())
            })
            .collect();
        tuples.push(format!("({})", placeholders.join(", ")));
    }
    sql.push_str(&tuples.join(", "));

    Ok((sql, params))
}

/// Builds a partial UPDATE by id. `sets` already contains `updated_at`.
pub fn build_update(
    dialect: Dialect,
    table: &str,
    sets: Vec<(String, SqlParam)>,
    id: &str,
) -> Result<(String, Vec<SqlParam>)> {
    if sets.is_empty() {
        return Err(MoonError::Internal("update with no assignments".into()));
    }

    let mut params: Vec<SqlParam> = Vec::with_capacity(sets.len() + 1);
    let assignments: Vec<String> = sets
        .into_iter()
        .map(|(column, param)| {
            params.push(param);
            format!(
                "{} = {}",
                dialect.quote_ident(&column),
                dialect.placeholder(params.len())
            )
        })
        .collect();

    params.push(SqlParam::Text(id.to_string()));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        dialect.quote_ident(table),
        assignments.join(", "),
        dialect.quote_ident("id"),
        dialect.placeholder(params.len())
    );

    Ok((sql, params))
}

/// Builds a DELETE by id.
pub fn build_delete(dialect: Dialect, table: &str, id: &str) -> (String, Vec<SqlParam>) {
    let sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        dialect.quote_ident(table),
        dialect.quote_ident("id"),
        dialect.placeholder(1)
    );
    (sql, vec![SqlParam::Text(id.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_row_insert() {
        let (sql, params) = build_insert(
            Dialect::Sqlite,
            "products",
            &["id".into(), "title".into()],
            vec![vec![SqlParam::Text("01".into()), SqlParam::Text("Mouse".into())]],
        )
        .unwrap();
        assert_eq!(sql, "INSERT INTO \"products\" (\"id\", \"title\") VALUES (?, ?)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_multi_row_insert_postgres_numbering() {
        let (sql, params) = build_insert(
            Dialect::Postgres,
            "products",
            &["id".into(), "title".into()],
            vec![
                vec![SqlParam::Text("01".into()), SqlParam::Text("A".into())],
                vec![SqlParam::Text("02".into()), SqlParam::Text("B".into())],
            ],
        )
        .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"products\" (\"id\", \"title\") VALUES ($1, $2), ($3, $4)"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_insert_rejects_ragged_rows() {
        let err = build_insert(
            Dialect::Sqlite,
            "products",
            &["id".into(), "title".into()],
            vec![vec![SqlParam::Text("01".into())]],
        )
        .unwrap_err();
        assert!(matches!(err, MoonError::Internal(_)));
    }

    #[test]
    fn test_update_by_id() {
        let (sql, params) = build_update(
            Dialect::Postgres,
            "products",
            vec![
                ("title".into(), SqlParam::Text("New".into())),
                ("updated_at".into(), SqlParam::Text("ts".into())),
            ],
            "01ABC",
        )
        .unwrap();
        assert_eq!(
            sql,
            "UPDATE \"products\" SET \"title\" = $1, \"updated_at\" = $2 WHERE \"id\" = $3"
        );
        assert_eq!(params.len(), 3);
        assert_eq!(params[2], SqlParam::Text("01ABC".into()));
    }

    #[test]
    fn test_delete_by_id() {
        let (sql, params) = build_delete(Dialect::MySql, "products", "01ABC");
        assert_eq!(sql, "DELETE FROM `products` WHERE `id` = ?");
        assert_eq!(params, vec![SqlParam::Text("01ABC".into())]);
    }
}
