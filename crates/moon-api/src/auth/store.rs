//! Persistence for users, refresh tokens and API keys.
//!
//! The three auth tables are plain collections as far as the SQL engine
//! is concerned: pseudo-schemas describe their columns so reads go
//! through the same builders and dynamic scanner as user data. The one
//! exception is the refresh-token table, whose primary key is the token
//! hash; its writes are small hand-built statements with the state
//! machine enforced in the WHERE clause.

use chrono::{DateTime, Utc};
use moon_common::{MoonError, Result};
use moon_db::{
    build_count, build_delete, build_get, build_insert, build_list, build_update, scan_aggregate,
    scan_record, AggOutput, Db, Filter, FilterOp, ListOptions, Sort, SqlParam,
};
use moon_schema::{new_record_id, CollectionSchema, FieldDef, FieldType};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::apikey;
use super::{EntityKind, Role};

static USERS_SCHEMA: Lazy<CollectionSchema> = Lazy::new(|| {
    CollectionSchema::new(
        "moon_users",
        vec![
            FieldDef::new("username", FieldType::String).unique(),
            FieldDef::new("email", FieldType::String).unique(),
            FieldDef::new("password_hash", FieldType::String),
            FieldDef::new("role", FieldType::String),
            FieldDef::new("can_write", FieldType::Boolean),
            FieldDef::new("last_login_at", FieldType::Datetime).nullable(),
        ],
    )
});

static APIKEYS_SCHEMA: Lazy<CollectionSchema> = Lazy::new(|| {
    CollectionSchema::new(
        "moon_apikeys",
        vec![
            FieldDef::new("name", FieldType::String).unique(),
            FieldDef::new("description", FieldType::Text).nullable(),
            FieldDef::new("key_hash", FieldType::String).unique(),
            FieldDef::new("role", FieldType::String),
            FieldDef::new("can_write", FieldType::Boolean),
            FieldDef::new("last_used_at", FieldType::Datetime).nullable(),
        ],
    )
});

static REFRESH_SCHEMA: Lazy<CollectionSchema> = Lazy::new(|| {
    CollectionSchema::new(
        "moon_refresh_tokens",
        vec![
            FieldDef::new("token_hash", FieldType::String),
            FieldDef::new("user_id", FieldType::String),
            FieldDef::new("expires_at", FieldType::Datetime),
            FieldDef::new("used_at", FieldType::Datetime).nullable(),
            FieldDef::new("revoked_at", FieldType::Datetime).nullable(),
        ],
    )
});

/// A `moon_users` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub can_write: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn entity(&self) -> super::AuthEntity {
        super::AuthEntity {
            id: self.id.clone(),
            kind: EntityKind::User,
            role: self.role,
            can_write: self.can_write,
        }
    }

    /// The client-visible projection, hash omitted.
    pub fn public_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "username": self.username,
            "email": self.email,
            "role": self.role,
            "can_write": self.can_write,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
            "last_login_at": self.last_login_at,
        })
    }
}

/// A `moon_apikeys` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub key_hash: String,
    pub role: Role,
    pub can_write: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    pub fn entity(&self) -> super::AuthEntity {
        super::AuthEntity {
            id: self.id.clone(),
            kind: EntityKind::ApiKey,
            role: self.role,
            can_write: self.can_write,
        }
    }

    pub fn public_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "role": self.role,
            "can_write": self.can_write,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
            "last_used_at": self.last_used_at,
        })
    }
}

/// A `moon_refresh_tokens` row.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

fn from_map<T: serde::de::DeserializeOwned>(
    map: serde_json::Map<String, serde_json::Value>,
) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|e| MoonError::Database(format!("auth row decode failed: {}", e)))
}

async fn fetch_one_filtered<T: serde::de::DeserializeOwned>(
    db: &Db,
    schema: &CollectionSchema,
    field: &str,
    value: &str,
) -> Result<Option<T>> {
    let opts = ListOptions {
        filters: vec![Filter::parse(schema, field, FilterOp::Eq, value)?],
        limit: 1,
        ..Default::default()
    };
    let (sql, params, columns) = build_list(db.dialect(), schema, &opts)?;
    let rows = db.fetch_all(&sql, &params).await?;
    match rows.first() {
        None => Ok(None),
        Some(row) => Ok(Some(from_map(scan_record(row, schema, &columns)?)?)),
    }
}

// ============================================================================
// Users
// ============================================================================

pub async fn count_admins(db: &Db) -> Result<i64> {
    let filters = vec![Filter::parse(&USERS_SCHEMA, "role", FilterOp::Eq, "admin")?];
    let (sql, params) = build_count(db.dialect(), &USERS_SCHEMA, &filters, None)?;
    let row = db
        .fetch_optional(&sql, &params)
        .await?
        .ok_or_else(|| MoonError::Database("count query returned no row".into()))?;
    scan_aggregate(&row, &AggOutput::Count)?
        .as_i64()
        .ok_or_else(|| MoonError::Database("count query returned no integer".into()))
}

pub async fn create_user(
    db: &Db,
    username: &str,
    email: &str,
    password_hash: &str,
    role: Role,
    can_write: bool,
) -> Result<User> {
    let id = new_record_id();
    let now = Utc::now();
    let columns = USERS_SCHEMA.column_names();
    let row = vec![
        SqlParam::Text(id.clone()),
        SqlParam::Text(username.to_lowercase()),
        SqlParam::Text(email.to_lowercase()),
        SqlParam::Text(password_hash.to_string()),
        SqlParam::Text(role.as_str().to_string()),
        SqlParam::Bool(can_write),
        SqlParam::Null(FieldType::Datetime),
        SqlParam::DateTime(now),
        SqlParam::DateTime(now),
    ];
    let (sql, params) = build_insert(db.dialect(), "moon_users", &columns, vec![row])?;
    db.execute(&sql, &params).await?;
    find_user_by_id(db, &id)
        .await?
        .ok_or_else(|| MoonError::Database("created user not readable".into()))
}

pub async fn find_user_by_id(db: &Db, id: &str) -> Result<Option<User>> {
    let (sql, params, columns) = build_get(db.dialect(), &USERS_SCHEMA, id, None)?;
    match db.fetch_optional(&sql, &params).await? {
        None => Ok(None),
        Some(row) => Ok(Some(from_map(scan_record(&row, &USERS_SCHEMA, &columns)?)?)),
    }
}

pub async fn find_user_by_username(db: &Db, username: &str) -> Result<Option<User>> {
    fetch_one_filtered(db, &USERS_SCHEMA, "username", &username.to_lowercase()).await
}

pub async fn find_user_by_email(db: &Db, email: &str) -> Result<Option<User>> {
    fetch_one_filtered(db, &USERS_SCHEMA, "email", &email.to_lowercase()).await
}

pub async fn list_users(db: &Db, limit: i64) -> Result<Vec<User>> {
    let opts = ListOptions {
        sort: vec![Sort { field: "username".into(), descending: false }],
        limit,
        ..Default::default()
    };
    let (sql, params, columns) = build_list(db.dialect(), &USERS_SCHEMA, &opts)?;
    let rows = db.fetch_all(&sql, &params).await?;
    rows.iter()
        .take(limit as usize)
        .map(|row| from_map(scan_record(row, &USERS_SCHEMA, &columns)?))
        .collect()
}

/// Applies the given column assignments; `updated_at` is appended here.
pub async fn update_user(db: &Db, id: &str, mut sets: Vec<(String, SqlParam)>) -> Result<User> {
    sets.push(("updated_at".into(), SqlParam::DateTime(Utc::now())));
    let (sql, params) = build_update(db.dialect(), "moon_users", sets, id)?;
    if db.execute(&sql, &params).await? == 0 {
        return Err(MoonError::NotFound(format!("user '{}' not found", id)));
    }
    find_user_by_id(db, id)
        .await?
        .ok_or_else(|| MoonError::NotFound(format!("user '{}' not found", id)))
}

pub async fn touch_last_login(db: &Db, id: &str) -> Result<()> {
    let sets = vec![("last_login_at".into(), SqlParam::DateTime(Utc::now()))];
    let (sql, params) = build_update(db.dialect(), "moon_users", sets, id)?;
    db.execute(&sql, &params).await?;
    Ok(())
}

pub async fn delete_user(db: &Db, id: &str) -> Result<()> {
    // Session rows go first so the delete is total even where foreign
    // keys are not enforced.
    delete_tokens_for_user(db, id).await?;
    let (sql, params) = build_delete(db.dialect(), "moon_users", id);
    if db.execute(&sql, &params).await? == 0 {
        return Err(MoonError::NotFound(format!("user '{}' not found", id)));
    }
    Ok(())
}

// ============================================================================
// Refresh tokens
// ============================================================================

pub async fn insert_refresh_token(
    db: &Db,
    token_hash: &str,
    user_id: &str,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    let d = db.dialect();
    let sql = format!(
        "INSERT INTO {} ({}, {}, {}, {}) VALUES ({}, {}, {}, {})",
        d.quote_ident("moon_refresh_tokens"),
        d.quote_ident("token_hash"),
        d.quote_ident("user_id"),
        d.quote_ident("expires_at"),
        d.quote_ident("created_at"),
        d.placeholder(1),
        d.placeholder(2),
        d.placeholder(3),
        d.placeholder(4),
    );
    db.execute(
        &sql,
        &[
            SqlParam::Text(token_hash.to_string()),
            SqlParam::Text(user_id.to_string()),
            SqlParam::DateTime(expires_at),
            SqlParam::DateTime(Utc::now()),
        ],
    )
    .await?;
    Ok(())
}

pub async fn find_refresh_token(db: &Db, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
    let d = db.dialect();
    let columns: Vec<String> = ["token_hash", "user_id", "expires_at", "used_at", "revoked_at"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    let select: Vec<String> = columns.iter().map(|c| d.quote_ident(c)).collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = {} LIMIT 1",
        select.join(", "),
        d.quote_ident("moon_refresh_tokens"),
        d.quote_ident("token_hash"),
        d.placeholder(1),
    );
    match db
        .fetch_optional(&sql, &[SqlParam::Text(token_hash.to_string())])
        .await?
    {
        None => Ok(None),
        Some(row) => Ok(Some(from_map(scan_record(&row, &REFRESH_SCHEMA, &columns)?)?)),
    }
}

/// Atomically consumes an issued token. Returns false when the token was
/// already used, revoked, expired or never existed; the caller reports
/// all of those uniformly as invalid credentials.
pub async fn consume_refresh_token(db: &Db, token_hash: &str) -> Result<bool> {
    let d = db.dialect();
    let now = Utc::now();
    let sql = format!(
        "UPDATE {} SET {} = {} WHERE {} = {} AND {} IS NULL AND {} IS NULL AND {} > {}",
        d.quote_ident("moon_refresh_tokens"),
        d.quote_ident("used_at"),
        d.placeholder(1),
        d.quote_ident("token_hash"),
        d.placeholder(2),
        d.quote_ident("used_at"),
        d.quote_ident("revoked_at"),
        d.quote_ident("expires_at"),
        d.placeholder(3),
    );
    let affected = db
        .execute(
            &sql,
            &[
                SqlParam::DateTime(now),
                SqlParam::Text(token_hash.to_string()),
                SqlParam::DateTime(now),
            ],
        )
        .await?;
    Ok(affected == 1)
}

/// Revokes an issued token (logout). Same uniform-failure contract as
/// [`consume_refresh_token`].
pub async fn revoke_refresh_token(db: &Db, token_hash: &str) -> Result<bool> {
    let d = db.dialect();
    let now = Utc::now();
    let sql = format!(
        "UPDATE {} SET {} = {} WHERE {} = {} AND {} IS NULL AND {} IS NULL AND {} > {}",
        d.quote_ident("moon_refresh_tokens"),
        d.quote_ident("revoked_at"),
        d.placeholder(1),
        d.quote_ident("token_hash"),
        d.placeholder(2),
        d.quote_ident("used_at"),
        d.quote_ident("revoked_at"),
        d.quote_ident("expires_at"),
        d.placeholder(3),
    );
    let affected = db
        .execute(
            &sql,
            &[
                SqlParam::DateTime(now),
                SqlParam::Text(token_hash.to_string()),
                SqlParam::DateTime(now),
            ],
        )
        .await?;
    Ok(affected == 1)
}

/// Revokes every live session of one user (password change, admin
/// revoke_sessions).
pub async fn revoke_all_for_user(db: &Db, user_id: &str) -> Result<u64> {
    let d = db.dialect();
    let sql = format!(
        "UPDATE {} SET {} = {} WHERE {} = {} AND {} IS NULL AND {} IS NULL",
        d.quote_ident("moon_refresh_tokens"),
        d.quote_ident("revoked_at"),
        d.placeholder(1),
        d.quote_ident("user_id"),
        d.placeholder(2),
        d.quote_ident("used_at"),
        d.quote_ident("revoked_at"),
    );
    db.execute(
        &sql,
        &[SqlParam::DateTime(Utc::now()), SqlParam::Text(user_id.to_string())],
    )
    .await
}

pub async fn delete_tokens_for_user(db: &Db, user_id: &str) -> Result<u64> {
    let d = db.dialect();
    let sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        d.quote_ident("moon_refresh_tokens"),
        d.quote_ident("user_id"),
        d.placeholder(1),
    );
    db.execute(&sql, &[SqlParam::Text(user_id.to_string())]).await
}

/// Garbage-collects tokens past their expiry.
pub async fn delete_expired_tokens(db: &Db) -> Result<u64> {
    let d = db.dialect();
    let sql = format!(
        "DELETE FROM {} WHERE {} < {}",
        d.quote_ident("moon_refresh_tokens"),
        d.quote_ident("expires_at"),
        d.placeholder(1),
    );
    db.execute(&sql, &[SqlParam::DateTime(Utc::now())]).await
}

// ============================================================================
// API keys
// ============================================================================

/// Creates a key and returns the record plus the plaintext, which is
/// shown exactly once.
pub async fn create_apikey(
    db: &Db,
    name: &str,
    description: Option<&str>,
    role: Role,
    can_write: bool,
) -> Result<(ApiKeyRecord, String)> {
    let (plaintext, key_hash) = apikey::generate_key();
    let id = new_record_id();
    let now = Utc::now();
    let columns = APIKEYS_SCHEMA.column_names();
    let row = vec![
        SqlParam::Text(id.clone()),
        SqlParam::Text(name.to_string()),
        match description {
            Some(text) => SqlParam::Text(text.to_string()),
            None => SqlParam::Null(FieldType::Text),
        },
        SqlParam::Text(key_hash),
        SqlParam::Text(role.as_str().to_string()),
        SqlParam::Bool(can_write),
        SqlParam::Null(FieldType::Datetime),
        SqlParam::DateTime(now),
        SqlParam::DateTime(now),
    ];
    let (sql, params) = build_insert(db.dialect(), "moon_apikeys", &columns, vec![row])?;
    db.execute(&sql, &params).await?;
    let record = find_apikey_by_id(db, &id)
        .await?
        .ok_or_else(|| MoonError::Database("created api key not readable".into()))?;
    Ok((record, plaintext))
}

pub async fn find_apikey_by_id(db: &Db, id: &str) -> Result<Option<ApiKeyRecord>> {
    let (sql, params, columns) = build_get(db.dialect(), &APIKEYS_SCHEMA, id, None)?;
    match db.fetch_optional(&sql, &params).await? {
        None => Ok(None),
        Some(row) => Ok(Some(from_map(scan_record(&row, &APIKEYS_SCHEMA, &columns)?)?)),
    }
}

pub async fn find_apikey_by_hash(db: &Db, key_hash: &str) -> Result<Option<ApiKeyRecord>> {
    fetch_one_filtered(db, &APIKEYS_SCHEMA, "key_hash", key_hash).await
}

pub async fn list_apikeys(db: &Db, limit: i64) -> Result<Vec<ApiKeyRecord>> {
    let opts = ListOptions {
        sort: vec![Sort { field: "name".into(), descending: false }],
        limit,
        ..Default::default()
    };
    let (sql, params, columns) = build_list(db.dialect(), &APIKEYS_SCHEMA, &opts)?;
    let rows = db.fetch_all(&sql, &params).await?;
    rows.iter()
        .take(limit as usize)
        .map(|row| from_map(scan_record(row, &APIKEYS_SCHEMA, &columns)?))
        .collect()
}

pub async fn update_apikey(
    db: &Db,
    id: &str,
    mut sets: Vec<(String, SqlParam)>,
) -> Result<ApiKeyRecord> {
    sets.push(("updated_at".into(), SqlParam::DateTime(Utc::now())));
    let (sql, params) = build_update(db.dialect(), "moon_apikeys", sets, id)?;
    if db.execute(&sql, &params).await? == 0 {
        return Err(MoonError::NotFound(format!("api key '{}' not found", id)));
    }
    find_apikey_by_id(db, id)
        .await?
        .ok_or_else(|| MoonError::NotFound(format!("api key '{}' not found", id)))
}

pub async fn delete_apikey(db: &Db, id: &str) -> Result<()> {
    let (sql, params) = build_delete(db.dialect(), "moon_apikeys", id);
    if db.execute(&sql, &params).await? == 0 {
        return Err(MoonError::NotFound(format!("api key '{}' not found", id)));
    }
    Ok(())
}

/// Fire-and-forget `last_used_at` touch from the auth middleware.
pub fn touch_apikey_last_used(db: Db, id: String) {
    tokio::spawn(async move {
        let sets = vec![("last_used_at".to_string(), SqlParam::DateTime(Utc::now()))];
        if let Ok((sql, params)) = build_update(db.dialect(), "moon_apikeys", sets, &id) {
            if let Err(e) = db.execute(&sql, &params).await {
                tracing::warn!(error = %e, "failed to touch api key last_used_at");
            }
        }
    });
}
