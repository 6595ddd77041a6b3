//! Data handlers: list / get / schema / create / update / destroy plus
//! aggregations, with atomic and best-effort batch writes.

use axum::http::StatusCode;
use axum::response::Response;
use chrono::Utc;
use moon_common::{FieldError, MoonError};
use moon_db::{
    build_aggregate, build_count, build_delete, build_get, build_insert, build_list,
    build_update, scan_aggregate, scan_record, AggFunc, Filter, FilterOp, ListOptions, Sort,
    SqlParam,
};
use moon_schema::{new_record_id, CollectionSchema, ValidatedRecord, Validator};
use serde_json::{json, Value as Json};

use crate::error::{json_response, ApiError, ApiResult};
use crate::state::AppState;

use super::ApiRequest;

/// Query keys that are never filter fields.
const RESERVED_KEYS: &[&str] = &[
    "sort", "limit", "after", "fields", "q", "schema", "atomic", "id", "name", "field",
];

struct ReadOptions {
    filters: Vec<Filter>,
    search: Option<String>,
    sort: Vec<Sort>,
    after: Option<String>,
    limit: i64,
    projection: Option<Vec<String>>,
    /// `None`, `Some(false)` = include schema, `Some(true)` = schema only.
    schema_mode: Option<bool>,
}

fn parse_read_options(
    state: &AppState,
    schema: &CollectionSchema,
    req: &ApiRequest,
) -> ApiResult<ReadOptions> {
    let mut filters = Vec::new();
    for (key, value) in &req.query {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(open) = key.find('[') {
            if !key.ends_with(']') {
                return Err(MoonError::Validation(format!("malformed filter '{}'", key)).into());
            }
            let field = &key[..open];
            let op = FilterOp::parse(&key[open + 1..key.len() - 1])?;
            filters.push(Filter::parse(schema, field, op, value)?);
        } else if schema.column_type(key).is_some() {
            filters.push(Filter::parse(schema, key, FilterOp::Eq, value)?);
        } else {
            return Err(MoonError::Validation(format!(
                "unknown query parameter '{}'",
                key
            ))
            .into());
        }
    }
    state.limits.check_filter_count(filters.len())?;

    let sort = match req.query_value("sort") {
        None => Vec::new(),
        Some(raw) => {
            let tokens: Vec<&str> = raw.split(',').filter(|t| !t.is_empty()).collect();
            state.limits.check_sort_count(tokens.len())?;
            tokens
                .iter()
                .map(|t| Sort::parse(schema, t))
                .collect::<moon_common::Result<Vec<_>>>()?
        }
    };

    let limit = match req.query_value("limit") {
        None => state.limits.effective_limit(None),
        Some(raw) => {
            let requested: i64 = raw
                .parse()
                .map_err(|_| MoonError::Validation(format!("invalid limit '{}'", raw)))?;
            state.limits.effective_limit(Some(requested))
        }
    };

    let projection = req.query_value("fields").map(|raw| {
        raw.split(',')
            .filter(|f| !f.is_empty())
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
    });

    let schema_mode = req
        .query_value("schema")
        .map(|v| v == "only")
        .or(if req.query.iter().any(|(k, _)| k == "schema") {
            Some(false)
        } else {
            None
        });

    Ok(ReadOptions {
        filters,
        search: req.query_value("q").map(|s| s.to_string()),
        sort,
        after: req.query_value("after").map(|s| s.to_string()),
        limit,
        projection,
        schema_mode,
    })
}

async fn count_matching(
    state: &AppState,
    schema: &CollectionSchema,
    filters: &[Filter],
    search: Option<&str>,
) -> ApiResult<i64> {
    let (sql, params) = build_count(state.db.dialect(), schema, filters, search)?;
    let row = state
        .db
        .fetch_optional(&sql, &params)
        .await?
        .ok_or_else(|| MoonError::Database("count query returned no row".into()))?;
    Ok(scan_aggregate(&row, &moon_db::AggOutput::Count)?
        .as_i64()
        .unwrap_or(0))
}

/// `:list`: filters, sort, projection, cursor pagination, search, and
/// the optional inline schema.
pub async fn list(
    state: &AppState,
    schema: &CollectionSchema,
    req: &ApiRequest,
) -> ApiResult<Response> {
    let opts = parse_read_options(state, schema, req)?;

    let mut body = serde_json::Map::new();
    if opts.schema_mode != Some(true) {
        let list_opts = ListOptions {
            projection: opts.projection.clone(),
            filters: opts.filters.clone(),
            search: opts.search.clone(),
            sort: opts.sort.clone(),
            after: opts.after.clone(),
            limit: opts.limit,
        };
        let (sql, params, columns) = build_list(state.db.dialect(), schema, &list_opts)?;
        let rows = state.db.fetch_all(&sql, &params).await?;

        let has_more = rows.len() as i64 > opts.limit;
        let mut data = Vec::with_capacity(rows.len().min(opts.limit as usize));
        for row in rows.iter().take(opts.limit as usize) {
            data.push(Json::Object(scan_record(row, schema, &columns)?));
        }
        let next_cursor = if has_more {
            data.last()
                .and_then(|r| r.get("id"))
                .and_then(|id| id.as_str())
                .map(|id| id.to_string())
        } else {
            None
        };

        body.insert("data".into(), Json::Array(data));
        body.insert(
            "next_cursor".into(),
            next_cursor.map(Json::String).unwrap_or(Json::Null),
        );
        body.insert("limit".into(), json!(opts.limit));
    }

    let total =
        count_matching(state, schema, &opts.filters, opts.search.as_deref()).await?;
    body.insert("total".into(), json!(total));

    if opts.schema_mode.is_some() {
        body.insert("schema".into(), schema.describe());
    }

    Ok(json_response(StatusCode::OK, &Json::Object(body)))
}

/// `:get?id=`: one record or 404.
pub async fn get(
    state: &AppState,
    schema: &CollectionSchema,
    req: &ApiRequest,
) -> ApiResult<Response> {
    let id = req
        .query_value("id")
        .ok_or_else(|| MoonError::Validation("the 'id' query parameter is required".into()))?;
    let projection = req.query_value("fields").map(|raw| {
        raw.split(',')
            .filter(|f| !f.is_empty())
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
    });

    let (sql, params, columns) =
        build_get(state.db.dialect(), schema, id, projection.as_ref())?;
    let row = state
        .db
        .fetch_optional(&sql, &params)
        .await?
        .ok_or_else(|| MoonError::NotFound(format!("record '{}' not found", id)))?;
    let record = scan_record(&row, schema, &columns)?;
    Ok(json_response(StatusCode::OK, &json!({ "data": record })))
}

/// `:schema`: field definitions plus the unfiltered record count.
pub async fn schema_info(
    state: &AppState,
    schema: &CollectionSchema,
    _req: &ApiRequest,
) -> ApiResult<Response> {
    let total = count_matching(state, schema, &[], None).await?;
    let mut body = schema.describe();
    if let Some(map) = body.as_object_mut() {
        map.insert("total".into(), json!(total));
    }
    Ok(json_response(StatusCode::OK, &body))
}

/// `:count`, `:sum`, `:avg`, `:min`, `:max`: `{value}` envelopes.
pub async fn aggregate(
    state: &AppState,
    schema: &CollectionSchema,
    func: AggFunc,
    req: &ApiRequest,
) -> ApiResult<Response> {
    let opts = parse_read_options(state, schema, req)?;
    let field = req.query_value("field");
    let (sql, params, output) = build_aggregate(
        state.db.dialect(),
        schema,
        func,
        field,
        &opts.filters,
        opts.search.as_deref(),
    )?;
    let row = state
        .db
        .fetch_optional(&sql, &params)
        .await?
        .ok_or_else(|| MoonError::Database("aggregate query returned no row".into()))?;
    let value = scan_aggregate(&row, &output)?;
    Ok(json_response(StatusCode::OK, &json!({ "value": value })))
}

/// Bind parameters for one full insert row: id, user fields in declared
/// order, then the timestamps.
fn insert_row(
    schema: &CollectionSchema,
    record: &ValidatedRecord,
    id: &str,
    now: chrono::DateTime<Utc>,
) -> ApiResult<Vec<SqlParam>> {
    let mut params = Vec::with_capacity(record.columns.len() + 3);
    params.push(SqlParam::Text(id.to_string()));
    for (name, value) in &record.columns {
        let field = schema
            .field(name)
            .ok_or_else(|| MoonError::Internal(format!("validated unknown field '{}'", name)))?;
        params.push(SqlParam::from_value(value, field.field_type));
    }
    params.push(SqlParam::DateTime(now));
    params.push(SqlParam::DateTime(now));
    Ok(params)
}

fn items_of(data: &Json) -> ApiResult<(Vec<&serde_json::Map<String, Json>>, bool)> {
    match data {
        Json::Object(item) => Ok((vec![item], false)),
        Json::Array(items) => {
            let mut objects = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                objects.push(item.as_object().ok_or_else(|| {
                    ApiError::validation(vec![FieldError::new(
                        "data",
                        "invalid_type",
                        "batch items must be objects",
                    )
                    .at_index(index)])
                })?);
            }
            Ok((objects, true))
        }
        _ => Err(MoonError::Validation("'data' must be an object or an array".into()).into()),
    }
}

async fn fetch_record_by_id(
    state: &AppState,
    schema: &CollectionSchema,
    id: &str,
) -> ApiResult<Json> {
    let (sql, params, columns) = build_get(state.db.dialect(), schema, id, None)?;
    let row = state
        .db
        .fetch_optional(&sql, &params)
        .await?
        .ok_or_else(|| MoonError::NotFound(format!("record '{}' not found", id)))?;
    Ok(Json::Object(scan_record(&row, schema, &columns)?))
}

/// `:create`: single record or batch, atomic by default, best-effort
/// under `?atomic=false` with per-item results. `Idempotency-Key`
/// replays the original response within its window.
pub async fn create(
    state: &AppState,
    schema: &CollectionSchema,
    req: &ApiRequest,
) -> ApiResult<Response> {
    if let Some(key) = &req.idempotency_key {
        if let Some(cached) = state.idempotency.get(&schema.name, key) {
            let status = StatusCode::from_u16(cached.status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return Ok(json_response(status, &cached.body));
        }
    }

    let (items, batched) = items_of(req.data()?)?;
    state.limits.check_batch_size(items.len())?;
    if items.is_empty() {
        return Err(MoonError::Validation("'data' must not be empty".into()).into());
    }

    let validator = Validator::new(schema);
    let (status, body) = if req.atomic() {
        create_atomic(state, schema, &validator, &items, batched).await?
    } else {
        create_best_effort(state, schema, &validator, &items).await?
    };

    if let Some(key) = &req.idempotency_key {
        state.idempotency.put(&schema.name, key, status.as_u16(), body.clone());
    }
    Ok(json_response(status, &body))
}

async fn create_atomic(
    state: &AppState,
    schema: &CollectionSchema,
    validator: &Validator<'_>,
    items: &[&serde_json::Map<String, Json>],
    batched: bool,
) -> ApiResult<(StatusCode, Json)> {
    // Validate everything before touching the database.
    let mut validated = Vec::with_capacity(items.len());
    let mut errors = Vec::new();
    for (index, item) in items.iter().enumerate() {
        match validator.validate_create(item) {
            Ok(record) => validated.push(record),
            Err(item_errors) => {
                errors.extend(item_errors.into_iter().map(|e| {
                    if batched {
                        e.at_index(index)
                    } else {
                        e
                    }
                }));
            }
        }
    }
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    let now = Utc::now();
    let ids: Vec<String> = validated.iter().map(|_| new_record_id()).collect();
    let rows = validated
        .iter()
        .zip(&ids)
        .map(|(record, id)| insert_row(schema, record, id, now))
        .collect::<ApiResult<Vec<_>>>()?;

    let columns = schema.column_names();
    let (sql, params) = build_insert(state.db.dialect(), &schema.name, &columns, rows)?;

    let mut tx = state.db.begin().await?;
    if let Err(error) = tx.execute(&sql, &params).await {
        tx.rollback().await.ok();
        return Err(error.into());
    }

    let mut records = Vec::with_capacity(ids.len());
    for id in &ids {
        let (sql, params, columns) = build_get(state.db.dialect(), schema, id, None)?;
        match tx.fetch_optional(&sql, &params).await {
            Ok(Some(row)) => records.push(Json::Object(scan_record(&row, schema, &columns)?)),
            Ok(None) => {
                tx.rollback().await.ok();
                return Err(MoonError::Database("inserted row not readable".into()).into());
            }
            Err(error) => {
                tx.rollback().await.ok();
                return Err(error.into());
            }
        }
    }
    tx.commit().await?;

    let body = if batched {
        json!({ "data": records })
    } else {
        json!({ "data": records.into_iter().next().unwrap_or(Json::Null) })
    };
    Ok((StatusCode::CREATED, body))
}

async fn create_best_effort(
    state: &AppState,
    schema: &CollectionSchema,
    validator: &Validator<'_>,
    items: &[&serde_json::Map<String, Json>],
) -> ApiResult<(StatusCode, Json)> {
    let columns = schema.column_names();
    let mut results = Vec::with_capacity(items.len());
    let mut succeeded = 0usize;

    for (index, item) in items.iter().enumerate() {
        let outcome: ApiResult<Json> = async {
            let record = validator
                .validate_create(item)
                .map_err(ApiError::validation)?;
            let id = new_record_id();
            let row = insert_row(schema, &record, &id, Utc::now())?;
            let (sql, params) =
                build_insert(state.db.dialect(), &schema.name, &columns, vec![row])?;
            state.db.execute(&sql, &params).await?;
            let data = fetch_record_by_id(state, schema, &id).await?;
            Ok(json!({ "index": index, "id": id, "status": "created", "data": data }))
        }
        .await;

        match outcome {
            Ok(entry) => {
                succeeded += 1;
                results.push(entry);
            }
            Err(error) => results.push(json!({
                "index": index,
                "status": "failed",
                "error_code": error.error.kind(),
                "error_message": error.error.public_message(),
            })),
        }
    }

    let body = json!({
        "results": results,
        "summary": {
            "total": items.len(),
            "succeeded": succeeded,
            "failed": items.len() - succeeded,
        },
    });
    Ok((StatusCode::MULTI_STATUS, body))
}

/// Splits an update item into its id and the partial field payload.
fn update_parts(
    item: &serde_json::Map<String, Json>,
) -> moon_common::Result<(String, serde_json::Map<String, Json>)> {
    let id = item
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| MoonError::Validation("update items require a string 'id'".into()))?;
    let mut fields = item.clone();
    fields.remove("id");
    Ok((id.to_string(), fields))
}

fn update_sets(
    schema: &CollectionSchema,
    record: &ValidatedRecord,
    now: chrono::DateTime<Utc>,
) -> ApiResult<Vec<(String, SqlParam)>> {
    let mut sets = Vec::with_capacity(record.columns.len() + 1);
    for (name, value) in &record.columns {
        let field = schema
            .field(name)
            .ok_or_else(|| MoonError::Internal(format!("validated unknown field '{}'", name)))?;
        sets.push((name.clone(), SqlParam::from_value(value, field.field_type)));
    }
    sets.push(("updated_at".to_string(), SqlParam::DateTime(now)));
    Ok(sets)
}

/// `:update`: partial updates by id, same batch semantics as create.
pub async fn update(
    state: &AppState,
    schema: &CollectionSchema,
    req: &ApiRequest,
) -> ApiResult<Response> {
    let (items, batched) = items_of(req.data()?)?;
    state.limits.check_batch_size(items.len())?;
    if items.is_empty() {
        return Err(MoonError::Validation("'data' must not be empty".into()).into());
    }

    let validator = Validator::new(schema);
    if req.atomic() {
        // Validate everything first.
        let mut parsed = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        for (index, item) in items.iter().enumerate() {
            match update_parts(item).map_err(|e| vec![FieldError::new("id", "invalid_id", e.to_string())]).and_then(
                |(id, fields)| {
                    validator
                        .validate_update(&fields)
                        .map(|record| (id, record))
                },
            ) {
                Ok(pair) => parsed.push(pair),
                Err(item_errors) => errors.extend(item_errors.into_iter().map(|e| {
                    if batched {
                        e.at_index(index)
                    } else {
                        e
                    }
                })),
            }
        }
        if !errors.is_empty() {
            return Err(ApiError::validation(errors));
        }

        let now = Utc::now();
        let mut tx = state.db.begin().await?;
        let mut records = Vec::with_capacity(parsed.len());
        for (id, record) in &parsed {
            let sets = update_sets(schema, record, now)?;
            let (sql, params) = build_update(state.db.dialect(), &schema.name, sets, id)?;
            match tx.execute(&sql, &params).await {
                Ok(0) => {
                    tx.rollback().await.ok();
                    return Err(MoonError::NotFound(format!("record '{}' not found", id)).into());
                }
                Ok(_) => {}
                Err(error) => {
                    tx.rollback().await.ok();
                    return Err(error.into());
                }
            }
            let (sql, params, columns) = build_get(state.db.dialect(), schema, id, None)?;
            match tx.fetch_optional(&sql, &params).await {
                Ok(Some(row)) => records.push(Json::Object(scan_record(&row, schema, &columns)?)),
                Ok(None) => {
                    tx.rollback().await.ok();
                    return Err(MoonError::NotFound(format!("record '{}' not found", id)).into());
                }
                Err(error) => {
                    tx.rollback().await.ok();
                    return Err(error.into());
                }
            }
        }
        tx.commit().await?;

        let body = if batched {
            json!({ "data": records })
        } else {
            json!({ "data": records.into_iter().next().unwrap_or(Json::Null) })
        };
        return Ok(json_response(StatusCode::OK, &body));
    }

    // Best effort: each item independently.
    let mut results = Vec::with_capacity(items.len());
    let mut succeeded = 0usize;
    for (index, item) in items.iter().enumerate() {
        let outcome: ApiResult<(String, Json)> = async {
            let (id, fields) = update_parts(item)?;
            let record = validator
                .validate_update(&fields)
                .map_err(ApiError::validation)?;
            let sets = update_sets(schema, &record, Utc::now())?;
            let (sql, params) = build_update(state.db.dialect(), &schema.name, sets, &id)?;
            if state.db.execute(&sql, &params).await? == 0 {
                return Err(MoonError::NotFound(format!("record '{}' not found", id)).into());
            }
            let data = fetch_record_by_id(state, schema, &id).await?;
            Ok((id, data))
        }
        .await;

        match outcome {
            Ok((id, data)) => {
                succeeded += 1;
                results.push(json!({ "index": index, "id": id, "status": "updated", "data": data }));
            }
            Err(error) => results.push(json!({
                "index": index,
                "id": item.get("id").and_then(|v| v.as_str()),
                "status": "failed",
                "error_code": error.error.kind(),
                "error_message": error.error.public_message(),
            })),
        }
    }

    let body = json!({
        "results": results,
        "summary": {
            "total": items.len(),
            "succeeded": succeeded,
            "failed": items.len() - succeeded,
        },
    });
    Ok(json_response(StatusCode::MULTI_STATUS, &body))
}

/// Accepts `"id"`, `{"id": ...}` and arrays of either.
fn destroy_ids(data: &Json) -> moon_common::Result<(Vec<String>, bool)> {
    let one = |value: &Json| -> moon_common::Result<String> {
        match value {
            Json::String(id) => Ok(id.clone()),
            Json::Object(map) => map
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    MoonError::Validation("destroy items require a string 'id'".into())
                }),
            _ => Err(MoonError::Validation(
                "destroy items must be ids or objects with an 'id'".into(),
            )),
        }
    };
    match data {
        Json::Array(items) => Ok((
            items.iter().map(one).collect::<moon_common::Result<Vec<_>>>()?,
            true,
        )),
        other => Ok((vec![one(other)?], false)),
    }
}

/// `:destroy`: delete by id; atomic batches abort on the first missing
/// id, best-effort batches report `not_found` per item.
pub async fn destroy(
    state: &AppState,
    schema: &CollectionSchema,
    req: &ApiRequest,
) -> ApiResult<Response> {
    let (ids, batched) = destroy_ids(req.data()?)?;
    state.limits.check_batch_size(ids.len())?;
    if ids.is_empty() {
        return Err(MoonError::Validation("'data' must not be empty".into()).into());
    }

    if req.atomic() {
        let mut tx = state.db.begin().await?;
        for id in &ids {
            let (sql, params) = build_delete(state.db.dialect(), &schema.name, id);
            match tx.execute(&sql, &params).await {
                Ok(0) => {
                    tx.rollback().await.ok();
                    return Err(MoonError::NotFound(format!("record '{}' not found", id)).into());
                }
                Ok(_) => {}
                Err(error) => {
                    tx.rollback().await.ok();
                    return Err(error.into());
                }
            }
        }
        tx.commit().await?;

        let body = if batched {
            json!({ "deleted": ids.len() })
        } else {
            json!({ "deleted": 1, "id": ids[0] })
        };
        return Ok(json_response(StatusCode::OK, &body));
    }

    let mut results = Vec::with_capacity(ids.len());
    let mut succeeded = 0usize;
    for (index, id) in ids.iter().enumerate() {
        let (sql, params) = build_delete(state.db.dialect(), &schema.name, id);
        match state.db.execute(&sql, &params).await {
            Ok(0) => results.push(json!({
                "index": index,
                "id": id,
                "status": "failed",
                "error_code": "not_found",
                "error_message": format!("record '{}' not found", id),
            })),
            Ok(_) => {
                succeeded += 1;
                results.push(json!({ "index": index, "id": id, "status": "deleted" }));
            }
            Err(error) => results.push(json!({
                "index": index,
                "id": id,
                "status": "failed",
                "error_code": error.kind(),
                "error_message": error.public_message(),
            })),
        }
    }

    let body = json!({
        "results": results,
        "summary": {
            "total": ids.len(),
            "succeeded": succeeded,
            "failed": ids.len() - succeeded,
        },
    });
    Ok(json_response(StatusCode::MULTI_STATUS, &body))
}
