//! Connection management for the three supported engines.
//!
//! One `Db` wraps one pool; which engine backs it is decided once from
//! configuration. Connection establishment retries with exponential
//! backoff so a database that is still booting does not kill the process.

use std::str::FromStr;
use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{info, warn};

use moon_common::{MoonError, Result};

use crate::dialect::Dialect;

/// Retry configuration for connection establishment.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculates the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(self.initial_delay_ms);
        }
        let delay_ms =
            (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((delay_ms as u64).min(self.max_delay_ms))
    }
}

/// Database configuration, resolved from the `database` config section.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub dialect: Dialect,
    /// File path for SQLite, database name otherwise.
    pub database: String,
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    /// Per-statement timeout, from `database.query_timeout`.
    pub query_timeout: Duration,
    /// WARN threshold, from `database.slow_query_threshold`.
    pub slow_query_threshold: Duration,
    pub retry: RetryConfig,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Sqlite,
            database: "moon.db".to_string(),
            host: "localhost".to_string(),
            port: None,
            user: String::new(),
            password: String::new(),
            max_connections: 10,
            query_timeout: Duration::from_secs(30),
            slow_query_threshold: Duration::from_millis(500),
            retry: RetryConfig::default(),
        }
    }
}

impl DbConfig {
    pub fn default_port(&self) -> u16 {
        match self.dialect {
            Dialect::Sqlite => 0,
            Dialect::Postgres => 5432,
            Dialect::MySql => 3306,
        }
    }
}

/// The pool behind `Db`: one of the three engines.
#[derive(Debug, Clone)]
pub enum DbPool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
    MySql(MySqlPool),
}

/// Opens a pool for the configured engine, retrying with backoff, and
/// verifies it with a ping before returning.
pub async fn connect(cfg: &DbConfig) -> Result<DbPool> {
    info!(
        dialect = cfg.dialect.name(),
        database = %cfg.database,
        max_connections = cfg.max_connections,
        "initializing connection pool"
    );

    let mut last_error: Option<MoonError> = None;
    for attempt in 0..=cfg.retry.max_retries {
        match try_connect(cfg).await {
            Ok(pool) => {
                if attempt > 0 {
                    info!(attempt, "connection established after retry");
                }
                ping(&pool).await?;
                return Ok(pool);
            }
            Err(e) => {
                if attempt < cfg.retry.max_retries {
                    let delay = cfg.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        max_retries = cfg.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "connection failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| MoonError::Unavailable("connection failed".to_string())))
}

async fn try_connect(cfg: &DbConfig) -> Result<DbPool> {
    let classify = |e: sqlx::Error| cfg.dialect.classify_sqlx(e);

    match cfg.dialect {
        Dialect::Sqlite => {
            let options = if cfg.database == ":memory:" {
                SqliteConnectOptions::from_str("sqlite::memory:")
                    .map_err(classify)?
                    .foreign_keys(true)
            } else {
                SqliteConnectOptions::new()
                    .filename(&cfg.database)
                    .create_if_missing(true)
                    .foreign_keys(true)
            };
            // A single writer avoids SQLITE_BUSY churn; reads still pool.
            let pool = SqlitePoolOptions::new()
                .max_connections(if cfg.database == ":memory:" { 1 } else { cfg.max_connections })
                .connect_with(options)
                .await
                .map_err(classify)?;
            Ok(DbPool::Sqlite(pool))
        }
        Dialect::Postgres => {
            let options = PgConnectOptions::new()
                .host(&cfg.host)
                .port(cfg.port.unwrap_or_else(|| cfg.default_port()))
                .username(&cfg.user)
                .password(&cfg.password)
                .database(&cfg.database);
            let pool = PgPoolOptions::new()
                .max_connections(cfg.max_connections)
                .connect_with(options)
                .await
                .map_err(classify)?;
            Ok(DbPool::Postgres(pool))
        }
        Dialect::MySql => {
            let options = MySqlConnectOptions::new()
                .host(&cfg.host)
                .port(cfg.port.unwrap_or_else(|| cfg.default_port()))
                .username(&cfg.user)
                .password(&cfg.password)
                .database(&cfg.database);
            let pool = MySqlPoolOptions::new()
                .max_connections(cfg.max_connections)
                .connect_with(options)
                .await
                .map_err(classify)?;
            Ok(DbPool::MySql(pool))
        }
    }
}

/// Verifies connectivity with a trivial statement.
pub async fn ping(pool: &DbPool) -> Result<()> {
    match pool {
        DbPool::Sqlite(p) => sqlx::query("SELECT 1")
            .execute(p)
            .await
            .map(|_| ())
            .map_err(|e| Dialect::Sqlite.classify_sqlx(e)),
        DbPool::Postgres(p) => sqlx::query("SELECT 1")
            .execute(p)
            .await
            .map(|_| ())
            .map_err(|e| Dialect::Postgres.classify_sqlx(e)),
        DbPool::MySql(p) => sqlx::query("SELECT 1")
            .execute(p)
            .await
            .map(|_| ())
            .map_err(|e| Dialect::MySql.classify_sqlx(e)),
    }
}

/// Closes the pool, waiting for checked-out connections to return.
pub async fn close(pool: &DbPool) {
    match pool {
        DbPool::Sqlite(p) => p.close().await,
        DbPool::Postgres(p) => p.close().await,
        DbPool::MySql(p) => p.close().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_calculation() {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        // Capped at max_delay_ms.
        assert_eq!(config.delay_for_attempt(6), Duration::from_millis(5000));
    }

    #[test]
    fn test_default_ports() {
        let mut cfg = DbConfig::default();
        cfg.dialect = Dialect::Postgres;
        assert_eq!(cfg.default_port(), 5432);
        cfg.dialect = Dialect::MySql;
        assert_eq!(cfg.default_port(), 3306);
    }

    #[tokio::test]
    async fn test_sqlite_memory_connect_and_ping() {
        let cfg = DbConfig {
            database: ":memory:".to_string(),
            ..DbConfig::default()
        };
        let pool = connect(&cfg).await.unwrap();
        ping(&pool).await.unwrap();
        close(&pool).await;
    }
}
