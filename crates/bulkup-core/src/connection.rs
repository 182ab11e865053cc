//! Connection, transaction and bulk transport traits

use std::time::Duration;

use crate::{ColumnDescriptor, FieldMapping, QueryResult, Result, RowSet, StatementResult, Value};
use async_trait::async_trait;

/// A database connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "mssql")
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data or schema
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;

    /// Get the bulk row transport if the driver has one
    fn as_bulk_loader(&self) -> Option<&dyn BulkLoader> {
        None
    }
}

/// A database transaction
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Execute a query within the transaction
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a statement within the transaction
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;
}

/// One high-volume row transfer into a table
#[derive(Debug, Clone, Copy)]
pub struct BulkLoadRequest<'a> {
    /// Destination table, as it would appear in SQL (already quoted or a `##` temp name)
    pub destination: &'a str,
    /// Rows to transfer
    pub rows: &'a RowSet,
    /// Source field to destination column pairs, in column order
    pub mapping: &'a [FieldMapping],
    /// Destination column layout if known. Empty when the table could not be inspected.
    pub columns: &'a [ColumnDescriptor],
    /// Rows per batch sent to the server
    pub batch_size: usize,
    /// Timeout for the whole transfer
    pub timeout: Duration,
}

/// Bulk row transport used to move a `RowSet` into a table
#[async_trait]
pub trait BulkLoader: Send + Sync {
    /// Transfer every row of the request. Returns the number of rows written.
    async fn bulk_load(&self, request: BulkLoadRequest<'_>) -> Result<u64>;
}
