//! In-memory connection for orchestrator tests

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bulkup_core::{
    BulkLoadRequest, BulkLoader, BulkUpError, ColumnDescriptor, Connection, QueryResult, Result,
    Row, StatementResult, TableName, Transaction, Value,
};
use parking_lot::Mutex;

/// A bulk load the mock received
#[derive(Debug, Clone)]
pub struct RecordedLoad {
    pub destination: String,
    pub rows: usize,
    pub mapping: Vec<(String, String)>,
    pub columns: Vec<String>,
    pub batch_size: usize,
}

#[derive(Debug, Default)]
struct MockState {
    statements: Vec<String>,
    tables: HashSet<String>,
    schemas: HashMap<String, Vec<ColumnDescriptor>>,
    loads: Vec<RecordedLoad>,
    fail_load: bool,
    fail_merge: bool,
    fail_drop: bool,
    stall_load: bool,
    stall_merge: bool,
    stall_drop: bool,
    merge_affected: u64,
}

/// Records every statement and tracks which tables exist
#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing table and the columns the inspector reports for it
    pub fn with_table(self, name: &str, columns: Vec<ColumnDescriptor>) -> Self {
        {
            let mut state = self.state.lock();
            state.tables.insert(name.to_string());
            state.schemas.insert(name.to_string(), columns);
        }
        self
    }

    pub fn fail_load(self) -> Self {
        self.state.lock().fail_load = true;
        self
    }

    pub fn fail_merge(self) -> Self {
        self.state.lock().fail_merge = true;
        self
    }

    pub fn fail_drop(self) -> Self {
        self.state.lock().fail_drop = true;
        self
    }

    /// Bulk loads never complete
    pub fn stall_load(self) -> Self {
        self.state.lock().stall_load = true;
        self
    }

    /// MERGE statements never complete
    pub fn stall_merge(self) -> Self {
        self.state.lock().stall_merge = true;
        self
    }

    /// DROP TABLE statements never complete
    pub fn stall_drop(self) -> Self {
        self.state.lock().stall_drop = true;
        self
    }

    /// Record `sql` and wait forever if `stalled` says this statement hangs
    async fn maybe_stall(&self, sql: &str, stalled: impl Fn(&MockState) -> bool) {
        let stall = {
            let mut state = self.state.lock();
            let stall = stalled(&state);
            if stall {
                state.statements.push(sql.to_string());
            }
            stall
        };
        if stall {
            std::future::pending::<()>().await;
        }
    }

    pub fn merge_affects(self, rows: u64) -> Self {
        self.state.lock().merge_affected = rows;
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    pub fn loads(&self) -> Vec<RecordedLoad> {
        self.state.lock().loads.clone()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state.lock().tables.contains(name)
    }

    /// Temporary tables that currently exist
    pub fn temp_tables(&self) -> Vec<String> {
        self.state
            .lock()
            .tables
            .iter()
            .filter(|t| t.starts_with('#'))
            .cloned()
            .collect()
    }

    fn apply(&self, sql: &str) -> Result<StatementResult> {
        let mut state = self.state.lock();
        state.statements.push(sql.to_string());

        if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
            let name = table_after(rest, " (")?;
            state.tables.insert(name);
            return Ok(StatementResult::default());
        }
        if let Some(index) = sql.find("DROP TABLE ") {
            if state.fail_drop {
                return Err(BulkUpError::Driver("drop refused".to_string()));
            }
            let name = table_after(&sql[index + "DROP TABLE ".len()..], "\n")?;
            state.tables.remove(&name);
            return Ok(StatementResult::default());
        }
        if sql.starts_with("MERGE INTO ") {
            if state.fail_merge {
                return Err(BulkUpError::Driver(
                    "Violation of PRIMARY KEY constraint".to_string(),
                ));
            }
            return Ok(StatementResult {
                affected_rows: state.merge_affected,
            });
        }
        Ok(StatementResult::default())
    }
}

fn table_after(text: &str, terminator: &str) -> Result<String> {
    let raw = text.split(terminator).next().unwrap_or(text).trim();
    TableName::parse(raw)
        .map(|t| t.to_string())
        .ok_or_else(|| BulkUpError::Query(format!("mock cannot parse table '{}'", raw)))
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.maybe_stall(sql, |state| state.stall_drop && sql.contains("DROP TABLE "))
            .await;
        self.apply(sql)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut state = self.state.lock();
        state.statements.push(sql.to_string());

        let mut result = QueryResult::empty();
        if sql.contains("INFORMATION_SCHEMA.COLUMNS") {
            let table = params.first().and_then(|v| v.as_str()).unwrap_or("");
            let schema = params.get(1).and_then(|v| v.as_str()).unwrap_or("dbo");
            let columns = state
                .schemas
                .get(&format!("{}.{}", schema, table))
                .or_else(|| state.schemas.get(table))
                .cloned()
                .unwrap_or_default();
            result.rows = columns.iter().map(catalog_row).collect();
        }
        Ok(result)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.state
            .lock()
            .statements
            .push("BEGIN TRANSACTION".to_string());
        Ok(Box::new(MockTransaction { conn: self.clone() }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn as_bulk_loader(&self) -> Option<&dyn BulkLoader> {
        Some(self)
    }
}

#[async_trait]
impl BulkLoader for MockConnection {
    async fn bulk_load(&self, request: BulkLoadRequest<'_>) -> Result<u64> {
        let stall = self.state.lock().stall_load;
        if stall {
            tokio::time::timeout(request.timeout, std::future::pending::<()>())
                .await
                .map_err(|_| BulkUpError::Transport("bulk load timed out".to_string()))?;
        }
        let mut state = self.state.lock();
        if state.fail_load {
            return Err(BulkUpError::Transport(
                "Cannot insert the value NULL into column 'Email'".to_string(),
            ));
        }
        let destination = table_after(request.destination, "\n")?;
        if !state.tables.contains(&destination) {
            return Err(BulkUpError::Transport(format!(
                "Invalid object name '{}'",
                destination
            )));
        }
        state.loads.push(RecordedLoad {
            destination,
            rows: request.rows.len(),
            mapping: request
                .mapping
                .iter()
                .map(|m| (m.source.clone(), m.destination.clone()))
                .collect(),
            columns: request.columns.iter().map(|c| c.name.clone()).collect(),
            batch_size: request.batch_size,
        });
        Ok(request.rows.len() as u64)
    }
}

struct MockTransaction {
    conn: MockConnection,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.conn
            .state
            .lock()
            .statements
            .push("COMMIT TRANSACTION".to_string());
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.conn
            .state
            .lock()
            .statements
            .push("ROLLBACK TRANSACTION".to_string());
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.conn.query(sql, params).await
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.conn
            .maybe_stall(sql, |state| state.stall_merge && sql.starts_with("MERGE INTO "))
            .await;
        self.conn.apply(sql)
    }
}

/// The row the catalog query returns for a descriptor
pub fn catalog_row(column: &ColumnDescriptor) -> Row {
    Row::new(
        [
            "COLUMN_NAME",
            "COLUMN_DEFAULT",
            "IsPrimaryKey",
            "IsIdentity",
            "DATA_TYPE",
            "CHARACTER_MAXIMUM_LENGTH",
            "NUMERIC_PRECISION",
            "NUMERIC_SCALE",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect(),
        vec![
            Value::from(column.name.as_str()),
            Value::from(column.default_value.clone()),
            Value::Int32(column.is_primary_key as i32),
            Value::Int32(column.is_identity as i32),
            Value::from(column.data_type.as_str()),
            if column.char_length == 0 {
                Value::Null
            } else {
                Value::Int32(column.char_length)
            },
            Value::from(column.numeric_precision),
            Value::from(column.numeric_scale.map(|s| s as i32)),
        ],
    )
}

/// Route driver logs to the test writer once per process
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
