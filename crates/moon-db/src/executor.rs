//! Query execution with timeouts and slow-query observability.
//!
//! `Db` is the one handle the rest of the workspace talks to. Every
//! statement runs under the configured query timeout, gets its latency
//! measured, and has driver errors classified by the dialect before they
//! escape.

use std::time::{Duration, Instant};

use tracing::warn;

use moon_common::{MoonError, Result};

use crate::connection::{self, DbConfig, DbPool};
use crate::dialect::Dialect;
use crate::param::{bind_mysql, bind_postgres, bind_sqlite, SqlParam};
use crate::row::DbRow;
use crate::transaction::{DbTx, TxInner};

/// Database handle: pool + dialect + execution policy.
#[derive(Debug, Clone)]
pub struct Db {
    pool: DbPool,
    dialect: Dialect,
    query_timeout: Duration,
    slow_query_threshold: Duration,
}

impl Db {
    /// Connects per configuration and verifies the pool with a ping.
    pub async fn connect(cfg: &DbConfig) -> Result<Self> {
        let pool = connection::connect(cfg).await?;
        Ok(Self {
            pool,
            dialect: cfg.dialect,
            query_timeout: cfg.query_timeout,
            slow_query_threshold: cfg.slow_query_threshold,
        })
    }

    /// Wraps an already-open pool (tests, tools).
    pub fn from_pool(pool: DbPool, dialect: Dialect, cfg: &DbConfig) -> Self {
        Self {
            pool,
            dialect,
            query_timeout: cfg.query_timeout,
            slow_query_threshold: cfg.slow_query_threshold,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Runs a SELECT and returns every row.
    pub async fn fetch_all(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<DbRow>> {
        let started = Instant::now();
        let dialect = self.dialect;
        let work = async {
            match &self.pool {
                DbPool::Sqlite(pool) => bind_sqlite(sqlx::query(sql), params)?
                    .fetch_all(pool)
                    .await
                    .map(|rows| rows.into_iter().map(DbRow::Sqlite).collect())
                    .map_err(|e| dialect.classify_sqlx(e)),
                DbPool::Postgres(pool) => bind_postgres(sqlx::query(sql), params)?
                    .fetch_all(pool)
                    .await
                    .map(|rows| rows.into_iter().map(DbRow::Postgres).collect())
                    .map_err(|e| dialect.classify_sqlx(e)),
                DbPool::MySql(pool) => bind_mysql(sqlx::query(sql), params)?
                    .fetch_all(pool)
                    .await
                    .map(|rows| rows.into_iter().map(DbRow::MySql).collect())
                    .map_err(|e| dialect.classify_sqlx(e)),
            }
        };
        let result = tokio::time::timeout(self.query_timeout, work).await;
        self.observe(sql, started);
        match result {
            Ok(inner) => inner,
            Err(_) => Err(self.timeout_error(sql)),
        }
    }

    /// Runs a SELECT expected to yield at most one row.
    pub async fn fetch_optional(&self, sql: &str, params: &[SqlParam]) -> Result<Option<DbRow>> {
        let started = Instant::now();
        let dialect = self.dialect;
        let work = async {
            match &self.pool {
                DbPool::Sqlite(pool) => bind_sqlite(sqlx::query(sql), params)?
                    .fetch_optional(pool)
                    .await
                    .map(|row| row.map(DbRow::Sqlite))
                    .map_err(|e| dialect.classify_sqlx(e)),
                DbPool::Postgres(pool) => bind_postgres(sqlx::query(sql), params)?
                    .fetch_optional(pool)
                    .await
                    .map(|row| row.map(DbRow::Postgres))
                    .map_err(|e| dialect.classify_sqlx(e)),
                DbPool::MySql(pool) => bind_mysql(sqlx::query(sql), params)?
                    .fetch_optional(pool)
                    .await
                    .map(|row| row.map(DbRow::MySql))
                    .map_err(|e| dialect.classify_sqlx(e)),
            }
        };
        let result = tokio::time::timeout(self.query_timeout, work).await;
        self.observe(sql, started);
        match result {
            Ok(inner) => inner,
            Err(_) => Err(self.timeout_error(sql)),
        }
    }

    /// Runs a statement and returns the affected row count.
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        let started = Instant::now();
        let dialect = self.dialect;
        let work = async {
            match &self.pool {
                DbPool::Sqlite(pool) => bind_sqlite(sqlx::query(sql), params)?
                    .execute(pool)
                    .await
                    .map(|r| r.rows_affected())
                    .map_err(|e| dialect.classify_sqlx(e)),
                DbPool::Postgres(pool) => bind_postgres(sqlx::query(sql), params)?
                    .execute(pool)
                    .await
                    .map(|r| r.rows_affected())
                    .map_err(|e| dialect.classify_sqlx(e)),
                DbPool::MySql(pool) => bind_mysql(sqlx::query(sql), params)?
                    .execute(pool)
                    .await
                    .map(|r| r.rows_affected())
                    .map_err(|e| dialect.classify_sqlx(e)),
            }
        };
        let result = tokio::time::timeout(self.query_timeout, work).await;
        self.observe(sql, started);
        match result {
            Ok(inner) => inner,
            Err(_) => Err(self.timeout_error(sql)),
        }
    }

    /// Runs a parameterless DDL statement.
    pub async fn execute_ddl(&self, sql: &str) -> Result<()> {
        self.execute(sql, &[]).await.map(|_| ())
    }

    /// Opens a transaction carrying the same execution policy.
    pub async fn begin(&self) -> Result<DbTx> {
        let inner = match &self.pool {
            DbPool::Sqlite(pool) => TxInner::Sqlite(
                pool.begin().await.map_err(|e| self.dialect.classify_sqlx(e))?,
            ),
            DbPool::Postgres(pool) => TxInner::Postgres(
                pool.begin().await.map_err(|e| self.dialect.classify_sqlx(e))?,
            ),
            DbPool::MySql(pool) => TxInner::MySql(
                pool.begin().await.map_err(|e| self.dialect.classify_sqlx(e))?,
            ),
        };
        Ok(DbTx::new(
            inner,
            self.dialect,
            self.query_timeout,
            self.slow_query_threshold,
        ))
    }

    /// Bounded connectivity check used by `/health`.
    pub async fn ping(&self, deadline: Duration) -> Result<()> {
        match tokio::time::timeout(deadline, connection::ping(&self.pool)).await {
            Ok(result) => result,
            Err(_) => Err(MoonError::Timeout("health ping timed out".into())),
        }
    }

    /// Closes the pool.
    pub async fn close(&self) {
        connection::close(&self.pool).await;
    }

    fn observe(&self, sql: &str, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed >= self.slow_query_threshold {
            // SQL shape only; values always live in bind parameters.
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                sql = %sql,
                "slow query"
            );
        }
    }

    fn timeout_error(&self, sql: &str) -> MoonError {
        warn!(sql = %sql, timeout_ms = self.query_timeout.as_millis() as u64, "query timed out");
        MoonError::Timeout(format!(
            "query exceeded the {} ms timeout",
            self.query_timeout.as_millis()
        ))
    }
}
