//! Collection lifecycle handlers: dialect-aware DDL with the registry
//! updated only after the database commit succeeds.

use axum::http::StatusCode;
use axum::response::Response;
use futures::future::join_all;
use moon_common::MoonError;
use moon_db::{
    build_add_column, build_count, build_create_table, build_drop_column, build_drop_table,
    build_modify_column, build_rename_column, scan_aggregate, AggOutput,
};
use moon_schema::{
    is_system_table, validate_collection_def, validate_identifier, CollectionSchema, FieldDef,
};
use serde::Deserialize;
use serde_json::{json, Value as Json};
use tracing::{info, warn};

use crate::error::{json_response, ApiResult};
use crate::state::AppState;

use super::ApiRequest;

/// `:list`: every collection with its record and field counts, sorted
/// by name. Counts run concurrently.
pub async fn list(state: &AppState, _req: &ApiRequest) -> ApiResult<Response> {
    let schemas = state.registry.list();

    let counts = join_all(schemas.iter().map(|schema| {
        let db = state.db.clone();
        let schema = schema.clone();
        async move {
            let (sql, params) = build_count(db.dialect(), &schema, &[], None)?;
            let row = db
                .fetch_optional(&sql, &params)
                .await?
                .ok_or_else(|| MoonError::Database("count query returned no row".into()))?;
            scan_aggregate(&row, &AggOutput::Count)?
                .as_i64()
                .ok_or_else(|| MoonError::Database("count query returned no integer".into()))
        }
    }))
    .await;

    let mut collections = Vec::with_capacity(schemas.len());
    for (schema, count) in schemas.iter().zip(counts) {
        collections.push(json!({
            "name": schema.name,
            "records_count": count?,
            "field_count": schema.field_count(),
        }));
    }

    let body = json!({ "count": collections.len(), "collections": collections });
    Ok(json_response(StatusCode::OK, &body))
}

/// Full field listing including the implicit system columns, as clients
/// see them.
fn describe_with_system(schema: &CollectionSchema) -> Json {
    let mut fields = vec![json!({
        "name": "id",
        "type": "string",
        "nullable": false,
        "description": "primary key",
    })];
    for field in &schema.fields {
        fields.push(serde_json::to_value(field).unwrap_or(Json::Null));
    }
    for name in ["created_at", "updated_at"] {
        fields.push(json!({ "name": name, "type": "datetime", "nullable": false }));
    }
    json!({
        "name": schema.name,
        "fields": fields,
        "field_count": schema.field_count(),
        "primary_key": "id",
    })
}

fn lookup(state: &AppState, name: &str) -> ApiResult<std::sync::Arc<CollectionSchema>> {
    if is_system_table(name) {
        return Err(MoonError::NotFound(format!("collection '{}' not found", name)).into());
    }
    state
        .registry
        .get(name)
        .ok_or_else(|| MoonError::NotFound(format!("collection '{}' not found", name)).into())
}

/// `:get?name=`: the registry entry plus system columns.
pub async fn get(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let name = req
        .query_value("name")
        .ok_or_else(|| MoonError::Validation("the 'name' query parameter is required".into()))?;
    let schema = lookup(state, name)?;
    Ok(json_response(StatusCode::OK, &describe_with_system(&schema)))
}

#[derive(Deserialize)]
struct CreatePayload {
    name: String,
    columns: Vec<FieldDef>,
}

/// `:create`: validates the definition, creates the table (and its
/// unique indexes), then registers the schema. Registry untouched on
/// any failure.
pub async fn create(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let payload: CreatePayload = serde_json::from_value(
        req.body
            .clone()
            .ok_or_else(|| MoonError::Validation("request body required".into()))?,
    )
    .map_err(|e| MoonError::Validation(format!("invalid collection definition: {}", e)))?;

    let schema = CollectionSchema::new(payload.name, payload.columns);
    validate_collection_def(&schema, &state.limits)?;
    state.limits.check_collection_count(state.registry.len())?;
    if state.registry.exists(&schema.name) {
        return Err(MoonError::Conflict(format!(
            "collection '{}' already exists",
            schema.name
        ))
        .into());
    }

    let statements = build_create_table(state.db.dialect(), &schema)?;
    if state.db.dialect().supports_transactional_ddl() {
        let mut tx = state.db.begin().await?;
        for statement in &statements {
            if let Err(error) = tx.execute_ddl(statement).await {
                tx.rollback().await.ok();
                return Err(error.into());
            }
        }
        tx.commit().await?;
    } else {
        // MySQL commits DDL implicitly: compensate with a drop when a
        // follow-up statement fails.
        for (index, statement) in statements.iter().enumerate() {
            if let Err(error) = state.db.execute_ddl(statement).await {
                if index > 0 {
                    let drop = build_drop_table(state.db.dialect(), &schema.name);
                    if let Err(drop_error) = state.db.execute_ddl(&drop).await {
                        warn!(
                            collection = %schema.name,
                            error = %drop_error,
                            "compensating drop failed after partial create"
                        );
                    }
                }
                return Err(error.into());
            }
        }
    }

    info!(collection = %schema.name, fields = schema.fields.len(), "collection created");
    state.registry.set(schema.clone());
    Ok(json_response(
        StatusCode::CREATED,
        &describe_with_system(&schema),
    ))
}

#[derive(Deserialize)]
struct RenameSpec {
    old_name: String,
    new_name: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct UpdatePayload {
    name: String,
    add_columns: Vec<FieldDef>,
    remove_columns: Vec<String>,
    rename_columns: Vec<RenameSpec>,
    modify_columns: Vec<FieldDef>,
}

/// `:update`: any combination of add/remove/rename/modify, applied in
/// one transaction where the dialect allows transactional DDL.
pub async fn update(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let payload: UpdatePayload = serde_json::from_value(
        req.body
            .clone()
            .ok_or_else(|| MoonError::Validation("request body required".into()))?,
    )
    .map_err(|e| MoonError::Validation(format!("invalid collection update: {}", e)))?;
    if payload.name.is_empty() {
        return Err(MoonError::Validation("the 'name' member is required".into()).into());
    }
    let current = lookup(state, &payload.name)?;

    // Compute the resulting schema and the DDL before executing anything.
    let mut fields = current.fields.clone();
    let mut statements: Vec<String> = Vec::new();
    let dialect = state.db.dialect();

    for field in &payload.add_columns {
        field.validate()?;
        if current.has_field(&field.name) || fields.iter().any(|f| f.name == field.name) {
            return Err(MoonError::Validation(format!(
                "field '{}' already exists",
                field.name
            ))
            .into());
        }
        statements.extend(build_add_column(dialect, &current.name, field)?);
        fields.push(field.clone());
    }

    for name in &payload.remove_columns {
        let position = fields
            .iter()
            .position(|f| &f.name == name)
            .ok_or_else(|| MoonError::Validation(format!("field '{}' does not exist", name)))?;
        statements.push(build_drop_column(dialect, &current.name, name));
        fields.remove(position);
    }

    for rename in &payload.rename_columns {
        validate_identifier(&rename.new_name)?;
        let field = fields
            .iter_mut()
            .find(|f| f.name == rename.old_name)
            .ok_or_else(|| {
                MoonError::Validation(format!("field '{}' does not exist", rename.old_name))
            })?;
        statements.push(build_rename_column(
            dialect,
            &current.name,
            &rename.old_name,
            &rename.new_name,
        )?);
        field.name = rename.new_name.clone();
    }

    for spec in &payload.modify_columns {
        spec.validate()?;
        let field = fields
            .iter_mut()
            .find(|f| f.name == spec.name)
            .ok_or_else(|| {
                MoonError::Validation(format!("field '{}' does not exist", spec.name))
            })?;
        statements.extend(build_modify_column(dialect, &current.name, spec)?);
        *field = spec.clone();
    }

    if statements.is_empty() {
        return Err(MoonError::Validation("collection update changes nothing".into()).into());
    }

    let updated = CollectionSchema::new(current.name.clone(), fields);
    updated.validate()?;
    state.limits.check_field_count(updated.fields.len())?;

    if dialect.supports_transactional_ddl() {
        let mut tx = state.db.begin().await?;
        for statement in &statements {
            if let Err(error) = tx.execute_ddl(statement).await {
                tx.rollback().await.ok();
                return Err(error.into());
            }
        }
        tx.commit().await?;
    } else {
        for statement in &statements {
            if let Err(error) = state.db.execute_ddl(statement).await {
                // The registry stays on the old schema; the next startup
                // consistency run re-infers whatever half-state the
                // engine left behind.
                warn!(
                    collection = %current.name,
                    statement = %statement,
                    "non-transactional DDL failed mid-update"
                );
                return Err(error.into());
            }
        }
    }

    info!(collection = %updated.name, "collection updated");
    state.registry.set(updated.clone());
    Ok(json_response(StatusCode::OK, &describe_with_system(&updated)))
}

/// `:destroy`: drops the table and removes the registry entry.
pub async fn destroy(state: &AppState, req: &ApiRequest) -> ApiResult<Response> {
    let name = match req.query_value("name") {
        Some(name) => name.to_string(),
        None => req
            .body_object()?
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| MoonError::Validation("the 'name' member is required".into()))?
            .to_string(),
    };
    let schema = lookup(state, &name)?;

    let drop = build_drop_table(state.db.dialect(), &schema.name);
    state.db.execute_ddl(&drop).await?;
    state.registry.delete(&schema.name);

    info!(collection = %schema.name, "collection destroyed");
    Ok(json_response(StatusCode::OK, &json!({ "deleted": schema.name })))
}
