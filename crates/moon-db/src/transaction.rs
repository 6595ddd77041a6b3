//! Transactions.
//!
//! `DbTx` mirrors the `Db` statement API inside a transaction and keeps
//! the same timeout and slow-query policy. Dropping an uncommitted
//! transaction rolls it back (sqlx guarantee), so error paths can simply
//! propagate with `?`.

use std::time::{Duration, Instant};

use sqlx::{MySql, Postgres, Sqlite, Transaction};
use tracing::warn;

use moon_common::{MoonError, Result};

use crate::dialect::Dialect;
use crate::param::{bind_mysql, bind_postgres, bind_sqlite, SqlParam};
use crate::row::DbRow;

/// The driver-specific transaction.
pub enum TxInner {
    Sqlite(Transaction<'static, Sqlite>),
    Postgres(Transaction<'static, Postgres>),
    MySql(Transaction<'static, MySql>),
}

/// A transaction with the `Db` execution policy attached.
pub struct DbTx {
    inner: TxInner,
    dialect: Dialect,
    query_timeout: Duration,
    slow_query_threshold: Duration,
}

impl DbTx {
    pub(crate) fn new(
        inner: TxInner,
        dialect: Dialect,
        query_timeout: Duration,
        slow_query_threshold: Duration,
    ) -> Self {
        Self { inner, dialect, query_timeout, slow_query_threshold }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Runs a SELECT inside the transaction.
    pub async fn fetch_all(&mut self, sql: &str, params: &[SqlParam]) -> Result<Vec<DbRow>> {
        let started = Instant::now();
        let dialect = self.dialect;
        let timeout = self.query_timeout;
        let work = async {
            match &mut self.inner {
                TxInner::Sqlite(tx) => bind_sqlite(sqlx::query(sql), params)?
                    .fetch_all(&mut **tx)
                    .await
                    .map(|rows| rows.into_iter().map(DbRow::Sqlite).collect())
                    .map_err(|e| dialect.classify_sqlx(e)),
                TxInner::Postgres(tx) => bind_postgres(sqlx::query(sql), params)?
                    .fetch_all(&mut **tx)
                    .await
                    .map(|rows| rows.into_iter().map(DbRow::Postgres).collect())
                    .map_err(|e| dialect.classify_sqlx(e)),
                TxInner::MySql(tx) => bind_mysql(sqlx::query(sql), params)?
                    .fetch_all(&mut **tx)
                    .await
                    .map(|rows| rows.into_iter().map(DbRow::MySql).collect())
                    .map_err(|e| dialect.classify_sqlx(e)),
            }
        };
        let result = tokio::time::timeout(timeout, work).await;
        observe(sql, started, self.slow_query_threshold);
        result.unwrap_or_else(|_| Err(timeout_error(sql, timeout)))
    }

    /// Runs a SELECT expected to yield at most one row.
    pub async fn fetch_optional(&mut self, sql: &str, params: &[SqlParam]) -> Result<Option<DbRow>> {
        let started = Instant::now();
        let dialect = self.dialect;
        let timeout = self.query_timeout;
        let work = async {
            match &mut self.inner {
                TxInner::Sqlite(tx) => bind_sqlite(sqlx::query(sql), params)?
                    .fetch_optional(&mut **tx)
                    .await
                    .map(|row| row.map(DbRow::Sqlite))
                    .map_err(|e| dialect.classify_sqlx(e)),
                TxInner::Postgres(tx) => bind_postgres(sqlx::query(sql), params)?
                    .fetch_optional(&mut **tx)
                    .await
                    .map(|row| row.map(DbRow::Postgres))
                    .map_err(|e| dialect.classify_sqlx(e)),
                TxInner::MySql(tx) => bind_mysql(sqlx::query(sql), params)?
                    .fetch_optional(&mut **tx)
                    .await
                    .map(|row| row.map(DbRow::MySql))
                    .map_err(|e| dialect.classify_sqlx(e)),
            }
        };
        let result = tokio::time::timeout(timeout, work).await;
        observe(sql, started, self.slow_query_threshold);
        result.unwrap_or_else(|_| Err(timeout_error(sql, timeout)))
    }

    /// Runs a statement and returns the affected row count.
    pub async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        let started = Instant::now();
        let dialect = self.dialect;
        let timeout = self.query_timeout;
        let work = async {
            match &mut self.inner {
                TxInner::Sqlite(tx) => bind_sqlite(sqlx::query(sql), params)?
                    .execute(&mut **tx)
                    .await
                    .map(|r| r.rows_affected())
                    .map_err(|e| dialect.classify_sqlx(e)),
                TxInner::Postgres(tx) => bind_postgres(sqlx::query(sql), params)?
                    .execute(&mut **tx)
                    .await
                    .map(|r| r.rows_affected())
                    .map_err(|e| dialect.classify_sqlx(e)),
                TxInner::MySql(tx) => bind_mysql(sqlx::query(sql), params)?
                    .execute(&mut **tx)
                    .await
                    .map(|r| r.rows_affected())
                    .map_err(|e| dialect.classify_sqlx(e)),
            }
        };
        let result = tokio::time::timeout(timeout, work).await;
        observe(sql, started, self.slow_query_threshold);
        result.unwrap_or_else(|_| Err(timeout_error(sql, timeout)))
    }

    /// Runs a parameterless DDL statement inside the transaction.
    pub async fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        self.execute(sql, &[]).await.map(|_| ())
    }

    pub async fn commit(self) -> Result<()> {
        let dialect = self.dialect;
        match self.inner {
            TxInner::Sqlite(tx) => tx.commit().await.map_err(|e| dialect.classify_sqlx(e)),
            TxInner::Postgres(tx) => tx.commit().await.map_err(|e| dialect.classify_sqlx(e)),
            TxInner::MySql(tx) => tx.commit().await.map_err(|e| dialect.classify_sqlx(e)),
        }
    }

    pub async fn rollback(self) -> Result<()> {
        let dialect = self.dialect;
        match self.inner {
            TxInner::Sqlite(tx) => tx.rollback().await.map_err(|e| dialect.classify_sqlx(e)),
            TxInner::Postgres(tx) => tx.rollback().await.map_err(|e| dialect.classify_sqlx(e)),
            TxInner::MySql(tx) => tx.rollback().await.map_err(|e| dialect.classify_sqlx(e)),
        }
    }
}

fn observe(sql: &str, started: Instant, threshold: Duration) {
    let elapsed = started.elapsed();
    if elapsed >= threshold {
        warn!(
            elapsed_ms = elapsed.as_millis() as u64,
            sql = %sql,
            "slow query in transaction"
        );
    }
}

fn timeout_error(sql: &str, timeout: Duration) -> MoonError {
    warn!(sql = %sql, timeout_ms = timeout.as_millis() as u64, "query timed out");
    MoonError::Timeout(format!(
        "query exceeded the {} ms timeout",
        timeout.as_millis()
    ))
}
