//! SELECT, COUNT and aggregate query building.

use moon_common::{MoonError, Result};
use moon_schema::{CollectionSchema, FieldType, Value, DEFAULT_DECIMAL_SCALE};

use crate::dialect::Dialect;
use crate::param::SqlParam;
use crate::row::AggOutput;

use super::types::{AggFunc, Filter, Sort};

/// Everything a `:list` request resolved to.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Requested projection; `None` selects every column. `id` is always
    /// included regardless.
    pub projection: Option<Vec<String>>,
    pub filters: Vec<Filter>,
    /// `?q=` full-text term, matched with LIKE across string columns.
    pub search: Option<String>,
    pub sort: Vec<Sort>,
    /// Cursor: only rows with `id` greater than this are returned.
    pub after: Option<String>,
    /// Page size already clamped by the limits; the query fetches one
    /// extra row to detect `has_more`.
    pub limit: i64,
}

/// Collects bind parameters and hands out dialect placeholders.
struct SqlWriter {
    dialect: Dialect,
    params: Vec<SqlParam>,
}

impl SqlWriter {
    fn new(dialect: Dialect) -> Self {
        Self { dialect, params: Vec::new() }
    }

    fn push(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        self.dialect.placeholder(self.params.len())
    }
}

/// Resolves the projected column list, forcing `id` into position zero.
fn resolve_projection(
    schema: &CollectionSchema,
    projection: Option<&Vec<String>>,
) -> Result<Vec<String>> {
    match projection {
        None => Ok(schema.column_names()),
        Some(fields) => {
            let mut columns = vec!["id".to_string()];
            for field in fields {
                if schema.column_type(field).is_none() {
                    return Err(MoonError::Validation(format!(
                        "collection '{}' has no field '{}'",
                        schema.name, field
                    )));
                }
                if field != "id" && !columns.contains(field) {
                    columns.push(field.clone());
                }
            }
            Ok(columns)
        }
    }
}

/// Renders the WHERE clause for filters + search (+ optional cursor) and
/// pushes their parameters in render order.
fn build_where(
    writer: &mut SqlWriter,
    schema: &CollectionSchema,
    filters: &[Filter],
    search: Option<&str>,
    after: Option<&str>,
) -> Result<String> {
    let dialect = writer.dialect;
    let mut clauses: Vec<String> = Vec::new();

    for filter in filters {
        let field_type = schema.column_type(&filter.field).ok_or_else(|| {
            MoonError::Internal(format!("filter on unresolved field '{}'", filter.field))
        })?;
        let column = dialect.comparable_expr(&dialect.quote_ident(&filter.field), field_type);
        match filter.op {
            super::types::FilterOp::In => {
                let placeholders: Vec<String> = filter
                    .values
                    .iter()
                    .map(|v| {
                        let placeholder = writer.push(SqlParam::from_value(v, field_type));
                        dialect.comparable_expr(&placeholder, field_type)
                    })
                    .collect();
                clauses.push(format!("{} IN ({})", column, placeholders.join(", ")));
            }
            op => {
                let value = filter.values.first().ok_or_else(|| {
                    MoonError::Internal(format!("filter on '{}' has no operand", filter.field))
                })?;
                let placeholder = writer.push(SqlParam::from_value(value, field_type));
                clauses.push(format!(
                    "{} {} {}",
                    column,
                    op.to_sql(),
                    dialect.comparable_expr(&placeholder, field_type)
                ));
            }
        }
    }

    if let Some(term) = search {
        let searchable = schema.searchable_fields();
        if !searchable.is_empty() {
            let pattern = format!("%{}%", term);
            let parts: Vec<String> = searchable
                .iter()
                .map(|field| {
                    let placeholder = writer
                        .push(SqlParam::from_value(&Value::Text(pattern.clone()), FieldType::Text));
                    format!("{} LIKE {}", dialect.quote_ident(&field.name), placeholder)
                })
                .collect();
            clauses.push(format!("({})", parts.join(" OR ")));
        }
    }

    if let Some(cursor) = after {
        let placeholder =
            writer.push(SqlParam::from_value(&Value::Text(cursor.to_string()), FieldType::String));
        clauses.push(format!("{} > {}", dialect.quote_ident("id"), placeholder));
    }

    Ok(if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    })
}

/// Builds the page query for `:list`. Returns the SQL, its parameters and
/// the projected column names for the scanner. The query fetches
/// `limit + 1` rows; the extra row signals `has_more`.
pub fn build_list(
    dialect: Dialect,
    schema: &CollectionSchema,
    opts: &ListOptions,
) -> Result<(String, Vec<SqlParam>, Vec<String>)> {
    let columns = resolve_projection(schema, opts.projection.as_ref())?;
    let mut writer = SqlWriter::new(dialect);

    let select_list: Vec<String> = columns.iter().map(|c| dialect.quote_ident(c)).collect();
    let mut sql = format!(
        "SELECT {} FROM {}",
        select_list.join(", "),
        dialect.quote_ident(&schema.name)
    );

    sql.push_str(&build_where(
        &mut writer,
        schema,
        &opts.filters,
        opts.search.as_deref(),
        opts.after.as_deref(),
    )?);

    let mut order: Vec<String> = Vec::with_capacity(opts.sort.len() + 1);
    for s in &opts.sort {
        let field_type = schema.column_type(&s.field).ok_or_else(|| {
            MoonError::Internal(format!("sort on unresolved field '{}'", s.field))
        })?;
        order.push(format!(
            "{} {}",
            dialect.comparable_expr(&dialect.quote_ident(&s.field), field_type),
            if s.descending { "DESC" } else { "ASC" }
        ));
    }
    // The id tiebreaker keeps cursor pagination total and deterministic.
    if !opts.sort.iter().any(|s| s.field == "id") {
        order.push(format!("{} ASC", dialect.quote_ident("id")));
    }
    sql.push_str(&format!(" ORDER BY {}", order.join(", ")));

    let limit_placeholder = writer.push(SqlParam::Int(opts.limit + 1));
    sql.push_str(&format!(" LIMIT {}", limit_placeholder));

    Ok((sql, writer.params, columns))
}

/// Builds the `COUNT(*)` companion of a list query: same filters and
/// search, no cursor.
pub fn build_count(
    dialect: Dialect,
    schema: &CollectionSchema,
    filters: &[Filter],
    search: Option<&str>,
) -> Result<(String, Vec<SqlParam>)> {
    let mut writer = SqlWriter::new(dialect);
    let mut sql = format!(
        "SELECT COUNT(*) AS {} FROM {}",
        dialect.quote_ident("value"),
        dialect.quote_ident(&schema.name)
    );
    sql.push_str(&build_where(&mut writer, schema, filters, search, None)?);
    Ok((sql, writer.params))
}

/// Builds the single-record query for `:get`.
pub fn build_get(
    dialect: Dialect,
    schema: &CollectionSchema,
    id: &str,
    projection: Option<&Vec<String>>,
) -> Result<(String, Vec<SqlParam>, Vec<String>)> {
    let columns = resolve_projection(schema, projection)?;
    let mut writer = SqlWriter::new(dialect);
    let select_list: Vec<String> = columns.iter().map(|c| dialect.quote_ident(c)).collect();
    let placeholder =
        writer.push(SqlParam::from_value(&Value::Text(id.to_string()), FieldType::String));
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = {} LIMIT 1",
        select_list.join(", "),
        dialect.quote_ident(&schema.name),
        dialect.quote_ident("id"),
        placeholder
    );
    Ok((sql, writer.params, columns))
}

/// Builds an aggregate query. `field` is required for everything except
/// `:count`. The SQL casts numeric aggregates so each driver returns a
/// deterministic wire type, described by the returned `AggOutput`.
pub fn build_aggregate(
    dialect: Dialect,
    schema: &CollectionSchema,
    func: AggFunc,
    field: Option<&str>,
    filters: &[Filter],
    search: Option<&str>,
) -> Result<(String, Vec<SqlParam>, AggOutput)> {
    let (expr, output) = aggregate_expr(dialect, schema, func, field)?;

    let mut writer = SqlWriter::new(dialect);
    let mut sql = format!(
        "SELECT {} AS {} FROM {}",
        expr,
        dialect.quote_ident("value"),
        dialect.quote_ident(&schema.name)
    );
    sql.push_str(&build_where(&mut writer, schema, filters, search, None)?);
    Ok((sql, writer.params, output))
}

fn aggregate_expr(
    dialect: Dialect,
    schema: &CollectionSchema,
    func: AggFunc,
    field: Option<&str>,
) -> Result<(String, AggOutput)> {
    if func == AggFunc::Count {
        return Ok(("COUNT(*)".to_string(), AggOutput::Count));
    }

    let name = field.ok_or_else(|| {
        MoonError::Validation(format!("{} requires a field parameter", func.sql_name().to_lowercase()))
    })?;
    let field_type = schema.column_type(name).ok_or_else(|| {
        MoonError::Validation(format!("collection '{}' has no field '{}'", schema.name, name))
    })?;
    let scale = schema
        .field(name)
        .map(|f| f.decimal_scale())
        .unwrap_or(DEFAULT_DECIMAL_SCALE);
    // SQLite decimal cells need the REAL cast before aggregation so the
    // math runs over numbers, not storage classes.
    let column = dialect.comparable_expr(&dialect.quote_ident(name), field_type);

    match func {
        AggFunc::Sum | AggFunc::Avg => match field_type {
            FieldType::Integer | FieldType::Float => Ok((
                format!("CAST({}({}) AS {})", func.sql_name(), column, dialect.double_cast()),
                AggOutput::Double,
            )),
            FieldType::Decimal => Ok((
                format!(
                    "CAST({}({}) AS {})",
                    func.sql_name(),
                    column,
                    dialect.decimal_cast(scale)
                ),
                AggOutput::Decimal(scale),
            )),
            other => Err(MoonError::Unsupported(format!(
                "{} applies only to numeric fields, '{}' is {}",
                func.sql_name().to_lowercase(),
                name,
                other
            ))),
        },
        AggFunc::Min | AggFunc::Max => {
            let expr = format!("{}({})", func.sql_name(), column);
            match field_type {
                FieldType::Integer => Ok((expr, AggOutput::Int)),
                FieldType::Float => Ok((expr, AggOutput::Double)),
                FieldType::Decimal => Ok((expr, AggOutput::Decimal(scale))),
                FieldType::Datetime => Ok((expr, AggOutput::DateTime)),
                FieldType::String | FieldType::Text => Ok((expr, AggOutput::Text)),
                other => Err(MoonError::Unsupported(format!(
                    "{} does not apply to {} fields",
                    func.sql_name().to_lowercase(),
                    other
                ))),
            }
        }
        AggFunc::Count => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::FilterOp;
    use super::*;
    use moon_schema::FieldDef;

    fn schema() -> CollectionSchema {
        CollectionSchema::new(
            "products",
            vec![
                FieldDef::new("title", FieldType::String),
                FieldDef::new("price", FieldType::Decimal),
                FieldDef::new("qty", FieldType::Integer),
            ],
        )
    }

    #[test]
    fn test_list_defaults() {
        let schema = schema();
        let opts = ListOptions { limit: 50, ..Default::default() };
        let (sql, params, columns) = build_list(Dialect::Sqlite, &schema, &opts).unwrap();
        assert_eq!(
            sql,
            "SELECT \"id\", \"title\", \"price\", \"qty\", \"created_at\", \"updated_at\" \
             FROM \"products\" ORDER BY \"id\" ASC LIMIT ?"
        );
        assert_eq!(params, vec![SqlParam::Int(51)]);
        assert_eq!(columns[0], "id");
    }

    #[test]
    fn test_list_filter_sort_cursor() {
        let schema = schema();
        let opts = ListOptions {
            filters: vec![Filter::parse(&schema, "price", FilterOp::Gt, "10").unwrap()],
            sort: vec![Sort { field: "price".into(), descending: true }],
            after: Some("01ARZ3NDEKTSV4RRFFQ69G5FAV".into()),
            limit: 1,
            ..Default::default()
        };
        let (sql, params, _) = build_list(Dialect::Sqlite, &schema, &opts).unwrap();
        assert_eq!(
            sql,
            "SELECT \"id\", \"title\", \"price\", \"qty\", \"created_at\", \"updated_at\" \
             FROM \"products\" WHERE CAST(\"price\" AS REAL) > CAST(? AS REAL) AND \"id\" > ? \
             ORDER BY CAST(\"price\" AS REAL) DESC, \"id\" ASC LIMIT ?"
        );
        assert_eq!(params.len(), 3);
        assert_eq!(params[0], SqlParam::Decimal("10.00".into()));
        assert_eq!(params[2], SqlParam::Int(2));
    }

    #[test]
    fn test_list_postgres_placeholders() {
        let schema = schema();
        let opts = ListOptions {
            filters: vec![Filter::parse(&schema, "qty", FilterOp::In, "1,2").unwrap()],
            limit: 10,
            ..Default::default()
        };
        let (sql, params, _) = build_list(Dialect::Postgres, &schema, &opts).unwrap();
        assert!(sql.contains("WHERE \"qty\" IN ($1, $2)"));
        assert!(sql.ends_with("LIMIT $3"));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_list_mysql_quoting() {
        let schema = schema();
        let opts = ListOptions { limit: 5, ..Default::default() };
        let (sql, _, _) = build_list(Dialect::MySql, &schema, &opts).unwrap();
        assert!(sql.starts_with("SELECT `id`, `title`"));
        assert!(sql.contains("FROM `products`"));
        assert!(sql.ends_with("LIMIT ?"));
    }

    #[test]
    fn test_projection_always_includes_id() {
        let schema = schema();
        let opts = ListOptions {
            projection: Some(vec!["title".into()]),
            limit: 10,
            ..Default::default()
        };
        let (sql, _, columns) = build_list(Dialect::Sqlite, &schema, &opts).unwrap();
        assert!(sql.starts_with("SELECT \"id\", \"title\" FROM"));
        assert_eq!(columns, vec!["id", "title"]);

        let opts = ListOptions {
            projection: Some(vec!["missing".into()]),
            limit: 10,
            ..Default::default()
        };
        assert!(build_list(Dialect::Sqlite, &schema, &opts).is_err());
    }

    #[test]
    fn test_search_spans_string_columns() {
        let schema = schema();
        let opts = ListOptions {
            search: Some("mouse".into()),
            limit: 10,
            ..Default::default()
        };
        let (sql, params, _) = build_list(Dialect::Sqlite, &schema, &opts).unwrap();
        assert!(sql.contains("WHERE (\"title\" LIKE ?)"));
        assert_eq!(params[0], SqlParam::Text("%mouse%".into()));
    }

    #[test]
    fn test_count_shares_where_but_not_cursor() {
        let schema = schema();
        let filters = vec![Filter::parse(&schema, "price", FilterOp::Gt, "10").unwrap()];
        let (sql, params) = build_count(Dialect::Sqlite, &schema, &filters, None).unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS \"value\" FROM \"products\" \
             WHERE CAST(\"price\" AS REAL) > CAST(? AS REAL)"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_get_by_id() {
        let schema = schema();
        let (sql, params, _) = build_get(Dialect::Postgres, &schema, "abc", None).unwrap();
        assert!(sql.ends_with("WHERE \"id\" = $1 LIMIT 1"));
        assert_eq!(params, vec![SqlParam::Text("abc".into())]);
    }

    #[test]
    fn test_aggregate_count() {
        let schema = schema();
        let (sql, _, output) =
            build_aggregate(Dialect::Sqlite, &schema, AggFunc::Count, None, &[], None).unwrap();
        assert_eq!(sql, "SELECT COUNT(*) AS \"value\" FROM \"products\"");
        assert_eq!(output, AggOutput::Count);
    }

    #[test]
    fn test_aggregate_sum_casts() {
        let schema = schema();
        let (sql, _, output) =
            build_aggregate(Dialect::Postgres, &schema, AggFunc::Sum, Some("qty"), &[], None)
                .unwrap();
        assert!(sql.contains("CAST(SUM(\"qty\") AS DOUBLE PRECISION)"));
        assert_eq!(output, AggOutput::Double);

        let (sql, _, output) =
            build_aggregate(Dialect::Postgres, &schema, AggFunc::Sum, Some("price"), &[], None)
                .unwrap();
        assert!(sql.contains("CAST(SUM(\"price\") AS NUMERIC(38, 2))"));
        assert_eq!(output, AggOutput::Decimal(2));
    }

    #[test]
    fn test_aggregate_numeric_only() {
        let schema = schema();
        let err =
            build_aggregate(Dialect::Sqlite, &schema, AggFunc::Avg, Some("title"), &[], None)
                .unwrap_err();
        assert!(matches!(err, MoonError::Unsupported(_)));

        let err = build_aggregate(Dialect::Sqlite, &schema, AggFunc::Sum, None, &[], None)
            .unwrap_err();
        assert!(matches!(err, MoonError::Validation(_)));
    }

    #[test]
    fn test_aggregate_min_max_types() {
        let schema = schema();
        let (_, _, output) =
            build_aggregate(Dialect::Sqlite, &schema, AggFunc::Min, Some("qty"), &[], None)
                .unwrap();
        assert_eq!(output, AggOutput::Int);

        let (_, _, output) =
            build_aggregate(Dialect::Sqlite, &schema, AggFunc::Max, Some("title"), &[], None)
                .unwrap();
        assert_eq!(output, AggOutput::Text);

        let (_, _, output) =
            build_aggregate(Dialect::Sqlite, &schema, AggFunc::Max, Some("created_at"), &[], None)
                .unwrap();
        assert_eq!(output, AggOutput::DateTime);
    }
}
