//! Bulk insert and merge orchestration
//!
//! A merge runs through a fixed sequence of states:
//!
//! ```text
//! Idle -> StagingCreated -> Loaded -> Merged -> Cleaned
//!   \__________\_______________\________\_____> Failed
//! ```
//!
//! The staging table is released on every exit path. Release failures are
//! logged and never replace the error that ended the operation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bulkup_core::{
    BulkLoadRequest, BulkLoader, BulkOptions, BulkUpError, ColumnDescriptor,
    ColumnMappingResolver, Connection, Record, Result, RowSet, Transaction,
};

use crate::staging::{StagingSchema, StagingTable, provision_staging_table};
use crate::{MergeStatement, MssqlDialect, SchemaInspector};

/// Progress of one merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Idle,
    StagingCreated,
    Loaded,
    Merged,
    Cleaned,
    Failed,
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeState::Idle => "idle",
            MergeState::StagingCreated => "staging_created",
            MergeState::Loaded => "loaded",
            MergeState::Merged => "merged",
            MergeState::Cleaned => "cleaned",
            MergeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// Rows written to the staging table
    pub rows_loaded: u64,
    /// Rows inserted, updated or deleted by the MERGE
    pub rows_affected: u64,
    /// Name of the staging table, already dropped
    pub staging_table: String,
}

/// Entry point for bulk insert and merge against one destination table
///
/// ```no_run
/// use std::sync::Arc;
/// use bulkup_core::{impl_record, BulkOptions, SourceType};
/// use bulkup_mssql::{BulkSync, MssqlConnection};
///
/// #[derive(Clone)]
/// struct User {
///     email: String,
///     name: String,
/// }
///
/// impl_record!(User {
///     email: SourceType::String,
///     name: SourceType::String,
/// });
///
/// # async fn run() -> anyhow::Result<()> {
/// let conn = MssqlConnection::connect("localhost", 1433, Some("app"), Some("sa"), Some("pw"), true).await?;
/// let sync = BulkSync::new(Arc::new(conn), BulkOptions::new("dbo.Users").with_keys(["Email"]));
///
/// let users = vec![User { email: "a@example.com".into(), name: "A".into() }];
/// let summary = sync.merge(&users).await?;
/// println!("{} rows affected", summary.rows_affected);
/// # Ok(())
/// # }
/// ```
pub struct BulkSync {
    conn: Arc<dyn Connection>,
    options: BulkOptions,
}

impl BulkSync {
    pub fn new(conn: Arc<dyn Connection>, options: BulkOptions) -> Self {
        Self { conn, options }
    }

    pub fn options(&self) -> &BulkOptions {
        &self.options
    }

    /// Bulk insert records straight into the destination table
    pub async fn insert<T: Record>(&self, records: &[T]) -> Result<u64> {
        let rows = RowSet::from_records(records)?;
        self.insert_row_set(&rows).await
    }

    /// Bulk insert a row set straight into the destination table
    #[tracing::instrument(skip(self, rows), fields(table = %self.options.table(), rows = rows.len()))]
    pub async fn insert_row_set(&self, rows: &RowSet) -> Result<u64> {
        self.options.validate()?;
        let loader = bulk_loader(self.conn.as_ref())?;

        let schema = SchemaInspector::inspect(self.conn.as_ref(), self.options.table()).await?;
        let mapping = ColumnMappingResolver::new(
            rows.field_names(),
            self.options.mappings(),
            self.options.exclusions(),
        )
        .with_schema(&schema)
        .resolve();
        let destination = MssqlDialect::new().quote_table_name(self.options.table())?;

        let loaded = loader
            .bulk_load(BulkLoadRequest {
                destination: &destination,
                rows,
                mapping: &mapping,
                columns: &schema,
                batch_size: self.options.batch_size(),
                timeout: self.options.timeout(),
            })
            .await?;

        tracing::debug!(rows_loaded = loaded, "bulk insert completed");
        Ok(loaded)
    }

    /// Merge records into the destination table
    pub async fn merge<T: Record>(&self, records: &[T]) -> Result<MergeSummary> {
        let rows = RowSet::from_records(records)?;
        self.merge_row_set(&rows).await
    }

    /// Merge a row set into the destination table
    pub async fn merge_row_set(&self, rows: &RowSet) -> Result<MergeSummary> {
        MergeOperation::new(Arc::clone(&self.conn), &self.options)
            .run(rows)
            .await
    }
}

impl fmt::Debug for BulkSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkSync")
            .field("driver", &self.conn.driver_name())
            .field("options", &self.options)
            .finish()
    }
}

fn bulk_loader(conn: &dyn Connection) -> Result<&dyn BulkLoader> {
    conn.as_bulk_loader().ok_or_else(|| {
        BulkUpError::NotSupported(format!(
            "driver '{}' has no bulk load transport",
            conn.driver_name()
        ))
    })
}

/// One in-flight merge
///
/// Consumed by [`MergeOperation::run`], so an operation and its staging
/// table serve exactly one merge.
pub struct MergeOperation<'a> {
    conn: Arc<dyn Connection>,
    options: &'a BulkOptions,
    table_schema: Vec<ColumnDescriptor>,
    staging: Option<StagingTable>,
    state: MergeState,
}

impl<'a> MergeOperation<'a> {
    pub fn new(conn: Arc<dyn Connection>, options: &'a BulkOptions) -> Self {
        Self {
            conn,
            options,
            table_schema: Vec::new(),
            staging: None,
            state: MergeState::Idle,
        }
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    /// Run the merge and release the staging table, whatever the outcome
    #[tracing::instrument(skip(self, rows), fields(table = %self.options.table(), rows = rows.len()))]
    pub async fn run(mut self, rows: &RowSet) -> Result<MergeSummary> {
        let result = self.execute(rows).await;
        self.cleanup().await;

        match result {
            Ok(summary) => {
                self.transition(MergeState::Cleaned);
                Ok(summary)
            }
            Err(e) => {
                tracing::debug!(error = %e, from = %self.state, "merge failed");
                self.transition(MergeState::Failed);
                Err(e)
            }
        }
    }

    async fn execute(&mut self, rows: &RowSet) -> Result<MergeSummary> {
        let options = self.options;
        options.validate_for_merge()?;
        let conn = Arc::clone(&self.conn);
        let loader = bulk_loader(conn.as_ref())?;

        self.table_schema = SchemaInspector::inspect(conn.as_ref(), options.table()).await?;
        self.check_keys()?;

        let resolver = ColumnMappingResolver::new(
            rows.field_names(),
            options.mappings(),
            options.exclusions(),
        )
        .with_schema(&self.table_schema)
        .strict(options.strict_map());
        let load_mapping = resolver.resolve();
        let merge_columns = resolver.merge_columns(options.keys());
        if merge_columns.insert.is_empty() {
            return Err(BulkUpError::Configuration(format!(
                "merge into {} has no insertable columns; every column is excluded or generated",
                options.table()
            )));
        }

        if let Some(identity) = self.table_schema.iter().find(|c| {
            c.is_identity
                && merge_columns
                    .insert
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(&c.name))
        }) {
            return Err(BulkUpError::Configuration(format!(
                "identity column '{}' of {} is generated by the server and cannot be mapped",
                identity.name,
                options.table()
            )));
        }

        let schema = if self.table_schema.is_empty() {
            StagingSchema::RowSet(rows)
        } else {
            StagingSchema::Columns(&self.table_schema)
        };
        let staging = self
            .staging
            .insert(provision_staging_table(&conn, schema).await?);
        let staging_name = staging.name().to_string();
        let staging_target = staging.quoted_name();
        let staging_columns = staging.columns().to_vec();
        self.transition(MergeState::StagingCreated);

        let rows_loaded = loader
            .bulk_load(BulkLoadRequest {
                destination: &staging_target,
                rows,
                mapping: &load_mapping,
                columns: &staging_columns,
                batch_size: options.batch_size(),
                timeout: options.timeout(),
            })
            .await?;
        self.transition(MergeState::Loaded);

        let statement = MergeStatement::build(
            options.table(),
            &staging_name,
            options.keys(),
            &merge_columns,
            options.delete(),
            options.delete_predicate(),
        )?;
        let rows_affected = self.apply(&statement.to_sql()).await?;
        self.transition(MergeState::Merged);

        Ok(MergeSummary {
            rows_loaded,
            rows_affected,
            staging_table: staging_name,
        })
    }

    /// Key columns must exist in a known destination schema
    fn check_keys(&self) -> Result<()> {
        if self.table_schema.is_empty() {
            return Ok(());
        }
        for key in self.options.keys() {
            if !self
                .table_schema
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(key))
            {
                return Err(BulkUpError::Configuration(format!(
                    "key column '{}' does not exist in {}",
                    key,
                    self.options.table()
                )));
            }
        }
        Ok(())
    }

    /// Execute the MERGE in its own transaction
    async fn apply(&self, sql: &str) -> Result<u64> {
        let tx = self
            .conn
            .begin_transaction()
            .await
            .map_err(|e| BulkUpError::MergeExecution(e.to_string()))?;

        let executed = tokio::time::timeout(self.options.timeout(), tx.execute(sql, &[])).await;
        let affected = match executed {
            Ok(Ok(result)) => result.affected_rows,
            Ok(Err(e)) => {
                rollback(tx, self.options.timeout()).await;
                return Err(BulkUpError::MergeExecution(e.to_string()));
            }
            Err(_) => {
                rollback(tx, self.options.timeout()).await;
                return Err(BulkUpError::MergeExecution(format!(
                    "merge timed out after {}s",
                    self.options.timeout_seconds()
                )));
            }
        };

        tx.commit()
            .await
            .map_err(|e| BulkUpError::MergeExecution(e.to_string()))?;
        Ok(affected)
    }

    /// Release the staging table, bounded by the operation timeout so a
    /// connection left mid-request by a timeout cannot stall the caller
    async fn cleanup(&mut self) {
        let timeout = self.options.timeout();
        if let Some(staging) = self.staging.as_mut() {
            let released = tokio::time::timeout(timeout, staging.release()).await;
            match released {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "staging cleanup failed"),
                Err(_) => tracing::warn!(
                    staging_table = %staging.name(),
                    timeout_secs = timeout.as_secs(),
                    "staging cleanup timed out"
                ),
            }
        }
    }

    fn transition(&mut self, next: MergeState) {
        tracing::debug!(
            table = %self.options.table(),
            staging_table = self.staging.as_ref().map(StagingTable::name).unwrap_or(""),
            from = %self.state,
            to = %next,
            "merge state changed"
        );
        self.state = next;
    }
}

async fn rollback(tx: Box<dyn Transaction>, timeout: Duration) {
    match tokio::time::timeout(timeout, tx.rollback()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "rollback after failed merge failed"),
        Err(_) => tracing::warn!(
            timeout_secs = timeout.as_secs(),
            "rollback after failed merge timed out"
        ),
    }
}

impl fmt::Debug for MergeOperation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeOperation")
            .field("table", &self.options.table())
            .field("state", &self.state)
            .field("staging", &self.staging)
            .finish()
    }
}
