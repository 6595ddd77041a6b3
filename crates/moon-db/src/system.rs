//! System tables.
//!
//! The auth tables are created once at startup, outside the dynamic
//! registry, with inline UNIQUE constraints so every engine gets the
//! indexes on `username`, `email` and `key_hash` from the same statement.

use moon_common::Result;

use crate::dialect::Dialect;
use crate::executor::Db;

/// DDL for the three auth tables on the given dialect.
pub fn system_table_ddl(dialect: Dialect) -> Vec<String> {
    let q = |name: &str| dialect.quote_ident(name);
    let dt = dialect.datetime_type();

    let users = format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         {} VARCHAR(26) PRIMARY KEY, \
         {} VARCHAR(255) NOT NULL UNIQUE, \
         {} VARCHAR(255) NOT NULL UNIQUE, \
         {} VARCHAR(255) NOT NULL, \
         {} VARCHAR(16) NOT NULL, \
         {} BOOLEAN NOT NULL, \
         {} {dt} NOT NULL, \
         {} {dt} NOT NULL, \
         {} {dt})",
        q("moon_users"),
        q("id"),
        q("username"),
        q("email"),
        q("password_hash"),
        q("role"),
        q("can_write"),
        q("created_at"),
        q("updated_at"),
        q("last_login_at"),
    );

    let refresh_tokens = format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         {} VARCHAR(64) PRIMARY KEY, \
         {} VARCHAR(26) NOT NULL, \
         {} {dt} NOT NULL, \
         {} {dt} NOT NULL, \
         {} {dt}, \
         {} {dt}, \
         FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE CASCADE)",
        q("moon_refresh_tokens"),
        q("token_hash"),
        q("user_id"),
        q("expires_at"),
        q("created_at"),
        q("used_at"),
        q("revoked_at"),
        q("user_id"),
        q("moon_users"),
        q("id"),
    );

    let apikeys = format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         {} VARCHAR(26) PRIMARY KEY, \
         {} VARCHAR(255) NOT NULL UNIQUE, \
         {} TEXT, \
         {} VARCHAR(64) NOT NULL UNIQUE, \
         {} VARCHAR(16) NOT NULL, \
         {} BOOLEAN NOT NULL, \
         {} {dt} NOT NULL, \
         {} {dt} NOT NULL, \
         {} {dt})",
        q("moon_apikeys"),
        q("id"),
        q("name"),
        q("description"),
        q("key_hash"),
        q("role"),
        q("can_write"),
        q("created_at"),
        q("updated_at"),
        q("last_used_at"),
    );

    vec![users, refresh_tokens, apikeys]
}

/// Creates the auth tables when missing. Idempotent.
pub async fn create_system_tables(db: &Db) -> Result<()> {
    for statement in system_table_ddl(db.dialect()) {
        db.execute_ddl(&statement).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_shape() {
        let statements = system_table_ddl(Dialect::Sqlite);
        assert_eq!(statements.len(), 3);
        assert!(statements[0].contains("\"username\" VARCHAR(255) NOT NULL UNIQUE"));
        assert!(statements[1].contains("ON DELETE CASCADE"));
        assert!(statements[2].contains("\"key_hash\" VARCHAR(64) NOT NULL UNIQUE"));
    }

    #[test]
    fn test_ddl_is_dialect_typed() {
        let statements = system_table_ddl(Dialect::Postgres);
        assert!(statements[0].contains("TIMESTAMPTZ"));
        let statements = system_table_ddl(Dialect::MySql);
        assert!(statements[0].contains("`moon_users`"));
        assert!(statements[0].contains("DATETIME(6)"));
    }
}
