//! Parameterized query building.
//!
//! Every function here produces a `(sql, params)` pair: values never
//! appear in the SQL text, identifiers are validated upstream against the
//! name regex and quoted per dialect. DDL is the one place literals are
//! rendered (DEFAULT clauses cannot be bound), and those literals come
//! from already-validated typed values.

pub mod ddl;
pub mod modify;
pub mod select;
pub mod types;

pub use ddl::{
    build_add_column, build_create_table, build_drop_column, build_drop_table,
    build_modify_column, build_rename_column,
};
pub use modify::{build_delete, build_insert, build_update};
pub use select::{build_aggregate, build_count, build_get, build_list, ListOptions};
pub use types::{AggFunc, Filter, FilterOp, Sort};
