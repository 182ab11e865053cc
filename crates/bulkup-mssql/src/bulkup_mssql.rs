//! SQL Server bulk load and merge for BulkUp
//!
//! This crate drives the whole reconciliation of a record collection with a
//! SQL Server table: schema inspection, staging table provisioning, bulk
//! transport over `tiberius`, MERGE synthesis and the orchestrator that runs
//! them with guaranteed staging cleanup.

mod connection;
mod dialect;
mod loader;
mod merge;
mod schema;
mod staging;
mod sync;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod connection_tests;
#[cfg(test)]
mod dialect_tests;
#[cfg(test)]
mod loader_tests;
#[cfg(test)]
mod merge_tests;
#[cfg(test)]
mod schema_tests;
#[cfg(test)]
mod staging_tests;
#[cfg(test)]
mod sync_tests;

pub use connection::{
    DEFAULT_CONNECT_TIMEOUT, MssqlConnection, MssqlConnectionError, MssqlTransaction,
};
pub use dialect::MssqlDialect;
pub use merge::MergeStatement;
pub use schema::SchemaInspector;
pub use staging::{
    StagingSchema, StagingTable, TableCreator, provision_staging_table, sql_type_for,
    staging_table_name,
};
pub use sync::{BulkSync, MergeOperation, MergeState, MergeSummary};
