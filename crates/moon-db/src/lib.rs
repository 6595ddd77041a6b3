//! Dialect-aware SQL engine for the moon data backend.
//!
//! One `Db` handle fronts SQLite, PostgreSQL or MySQL behind the same
//! statement API. The pieces:
//!
//! - [`dialect`]: per-engine quoting, placeholders, type maps, ALTER
//!   capabilities and driver error classification
//! - [`query`]: parameterized DDL and DML building
//! - [`row`]: the dynamic scanner producing uniformly typed values
//! - [`executor`] / [`transaction`]: execution with timeouts and
//!   slow-query logging, inside and outside transactions
//! - [`system`]: the auth tables created at startup
//! - [`consistency`]: the startup reconciliation between database state
//!   and the in-memory registry

pub mod connection;
pub mod consistency;
pub mod dialect;
pub mod executor;
pub mod param;
pub mod query;
pub mod row;
pub mod system;
pub mod transaction;

pub use connection::{DbConfig, DbPool, RetryConfig};
pub use consistency::{ConsistencyReport, RecoveryConfig};
pub use dialect::{field_type_from_storage, Dialect};
pub use executor::Db;
pub use param::SqlParam;
pub use query::{
    build_add_column, build_aggregate, build_count, build_create_table, build_delete,
    build_drop_column, build_drop_table, build_get, build_insert, build_list,
    build_modify_column, build_rename_column, build_update, AggFunc, Filter, FilterOp,
    ListOptions, Sort,
};
pub use row::{scan_aggregate, scan_column, scan_id, scan_record, AggOutput, DbRow};
pub use transaction::DbTx;
