//! BulkUp Core - driver-independent abstractions for bulk load and merge
//!
//! This crate provides the traits and types the SQL Server implementation
//! builds on. It defines:
//!
//! - `Connection` / `Transaction` - statement execution and transactions
//! - `BulkLoader` - the high-volume row transport seam
//! - `Record` / `RowSet` - typed records and their tabular form
//! - `ColumnDescriptor` - introspected destination column metadata
//! - `ColumnMappingResolver` - source field to destination column resolution
//! - `BulkOptions` / `ConnectionConfig` - caller configuration

mod config;
mod connection;
mod error;
mod mapping;
mod record;
mod schema;
mod types;

#[cfg(test)]
mod mapping_tests;
#[cfg(test)]
mod types_tests;

pub use config::*;
pub use connection::*;
pub use error::*;
pub use mapping::*;
pub use record::*;
pub use schema::*;
pub use types::*;
