//! Query builder types: filters, sort specs, aggregate functions.

use chrono::{DateTime, Utc};
use moon_common::{MoonError, Result};
use moon_schema::{CollectionSchema, Decimal, FieldType, Value, DEFAULT_DECIMAL_SCALE};

/// Filter comparison operators, the `[op]` part of `field[op]=value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
}

impl FilterOp {
    /// Parses the operator token from the query string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "eq" => Ok(FilterOp::Eq),
            "ne" => Ok(FilterOp::Ne),
            "gt" => Ok(FilterOp::Gt),
            "gte" => Ok(FilterOp::Gte),
            "lt" => Ok(FilterOp::Lt),
            "lte" => Ok(FilterOp::Lte),
            "like" => Ok(FilterOp::Like),
            "in" => Ok(FilterOp::In),
            other => Err(MoonError::Validation(format!(
                "unknown filter operator '{}'",
                other
            ))),
        }
    }

    /// The SQL operator text.
    pub fn to_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Like => "LIKE",
            FilterOp::In => "IN",
        }
    }
}

/// One parsed filter condition with typed operands.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    /// One value, except `In` which carries one per list element.
    pub values: Vec<Value>,
}

impl Filter {
    /// Parses a raw `field[op]=value` triple against the schema, typing
    /// the operand(s) by the column's declared type.
    pub fn parse(
        schema: &CollectionSchema,
        field: &str,
        op: FilterOp,
        raw: &str,
    ) -> Result<Self> {
        let field_type = schema.column_type(field).ok_or_else(|| {
            MoonError::Validation(format!(
                "collection '{}' has no filterable field '{}'",
                schema.name, field
            ))
        })?;

        if field_type == FieldType::Json {
            return Err(MoonError::Validation(format!(
                "field '{}' is json and cannot be filtered",
                field
            )));
        }
        if op == FilterOp::Like && !matches!(field_type, FieldType::String | FieldType::Text) {
            return Err(MoonError::Validation(format!(
                "like filters apply only to string fields, '{}' is {}",
                field, field_type
            )));
        }

        let scale = schema
            .field(field)
            .map(|f| f.decimal_scale())
            .unwrap_or(DEFAULT_DECIMAL_SCALE);

        let values = if op == FilterOp::In {
            raw.split(',')
                .map(|part| typed_operand(field, field_type, scale, part))
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![typed_operand(field, field_type, scale, raw)?]
        };

        Ok(Self { field: field.to_string(), op, values })
    }
}

/// Converts one raw query-string operand to a typed value.
fn typed_operand(field: &str, field_type: FieldType, scale: u32, raw: &str) -> Result<Value> {
    let bad = |expected: &str| {
        MoonError::Validation(format!(
            "filter value '{}' for field '{}' is not {}",
            raw, field, expected
        ))
    };

    match field_type {
        FieldType::String | FieldType::Text => Ok(Value::Text(raw.to_string())),
        FieldType::Integer => raw.parse::<i64>().map(Value::Int).map_err(|_| bad("an integer")),
        FieldType::Float => raw.parse::<f64>().map(Value::Float).map_err(|_| bad("a number")),
        FieldType::Decimal => Decimal::parse_canonical(raw, scale)
            .map(Value::Decimal)
            .map_err(|_| bad("a decimal")),
        FieldType::Boolean => match raw {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(bad("true or false")),
        },
        FieldType::Datetime => DateTime::parse_from_rfc3339(raw)
            .map(|ts| Value::DateTime(ts.with_timezone(&Utc)))
            .map_err(|_| bad("an RFC3339 datetime")),
        FieldType::Json => Err(bad("filterable")),
    }
}

/// One sort key; `descending` comes from a leading `-`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    /// Parses one element of the `sort=` list.
    pub fn parse(schema: &CollectionSchema, token: &str) -> Result<Self> {
        let (field, descending) = match token.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (token, false),
        };
        if schema.column_type(field).is_none() {
            return Err(MoonError::Validation(format!(
                "collection '{}' has no sortable field '{}'",
                schema.name, field
            )));
        }
        Ok(Self { field: field.to_string(), descending })
    }
}

/// Aggregation functions exposed as `:count`, `:sum`, `:avg`, `:min`, `:max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "count" => Some(AggFunc::Count),
            "sum" => Some(AggFunc::Sum),
            "avg" => Some(AggFunc::Avg),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            _ => None,
        }
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }
}
