//! Table DDL, the source type map and staging table lifecycle

use std::fmt;
use std::sync::Arc;

use bulkup_core::{
    BulkUpError, ColumnDescriptor, Connection, Result, RowSet, RowSetColumn, SourceType,
    TableName,
};
use uuid::Uuid;

use crate::MssqlDialect;

/// Longest NVARCHAR length rendered explicitly; anything longer is `MAX`
const MAX_EXPLICIT_STRING_LENGTH: i64 = 8000;

/// Types whose catalog length is part of the declaration
const LENGTH_TYPES: &[&str] = &["char", "varchar", "nchar", "nvarchar", "binary", "varbinary"];

/// A SQL Server column type resolved from a source column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SqlType {
    name: &'static str,
    /// `Some(-1)` renders as `(MAX)`
    length: Option<i32>,
    precision: Option<(u8, u8)>,
}

impl SqlType {
    const fn plain(name: &'static str) -> Self {
        Self {
            name,
            length: None,
            precision: None,
        }
    }

    fn to_descriptor(self, name: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            data_type: self.name.to_ascii_lowercase(),
            char_length: self.length.unwrap_or(0),
            numeric_precision: self.precision.map(|(p, _)| p),
            numeric_scale: self.precision.map(|(_, s)| s),
            ..Default::default()
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        match (self.length, self.precision) {
            (Some(-1), _) => f.write_str("(MAX)"),
            (Some(n), _) => write!(f, "({})", n),
            (None, Some((p, s))) => write!(f, "({},{})", p, s),
            (None, None) => Ok(()),
        }
    }
}

fn resolve_sql_type(column: &RowSetColumn) -> Result<SqlType> {
    let sql_type = match column.source_type {
        SourceType::Binary => SqlType {
            length: Some(-1),
            ..SqlType::plain("VARBINARY")
        },
        SourceType::Boolean => SqlType::plain("BIT"),
        SourceType::DateTime => SqlType::plain("DATETIME"),
        SourceType::DateTimeOffset => SqlType::plain("DATETIMEOFFSET"),
        SourceType::Decimal => match (column.precision, column.scale) {
            (Some(p), Some(s)) => SqlType {
                precision: Some((p, s)),
                ..SqlType::plain("DECIMAL")
            },
            _ => SqlType::plain("DECIMAL"),
        },
        SourceType::Double => SqlType::plain("FLOAT"),
        SourceType::Single => SqlType::plain("REAL"),
        SourceType::Int64 => SqlType::plain("BIGINT"),
        SourceType::Int32 => SqlType::plain("INT"),
        SourceType::Int16 => SqlType::plain("SMALLINT"),
        SourceType::String => {
            let length = match column.max_length {
                Some(n) if n > 0 && n <= MAX_EXPLICIT_STRING_LENGTH => n as i32,
                _ => -1,
            };
            SqlType {
                length: Some(length),
                ..SqlType::plain("NVARCHAR")
            }
        }
        SourceType::Byte => SqlType::plain("TINYINT"),
        SourceType::Guid => SqlType::plain("UNIQUEIDENTIFIER"),
        other => {
            return Err(BulkUpError::SchemaTranslation(format!(
                "column '{}' has type '{}' with no SQL Server mapping",
                column.name, other
            )));
        }
    };
    Ok(sql_type)
}

/// The SQL Server type declaration for a tabular column
///
/// ```
/// use bulkup_core::{RowSetColumn, SourceType};
/// use bulkup_mssql::sql_type_for;
///
/// let name = RowSetColumn::new("Name", SourceType::String).with_max_length(50);
/// assert_eq!(sql_type_for(&name).unwrap(), "NVARCHAR(50)");
///
/// let flag = RowSetColumn::new("Flag", SourceType::SByte);
/// assert!(sql_type_for(&flag).is_err());
/// ```
pub fn sql_type_for(column: &RowSetColumn) -> Result<String> {
    resolve_sql_type(column).map(|t| t.to_string())
}

/// A fresh global temporary table name, unique per call
pub fn staging_table_name() -> String {
    format!("##T{}", Uuid::new_v4().to_string().replace('-', "_"))
}

/// Renders CREATE TABLE statements
#[derive(Debug, Clone, Copy, Default)]
pub struct TableCreator {
    dialect: MssqlDialect,
}

impl TableCreator {
    pub fn new() -> Self {
        Self {
            dialect: MssqlDialect::new(),
        }
    }

    /// DDL mirroring introspected columns
    ///
    /// Identity columns become `IDENTITY(0,1)`; other columns keep their
    /// captured default. Primary key columns form one clustered constraint.
    pub fn create_from_columns_sql(&self, table: &str, columns: &[ColumnDescriptor]) -> Result<String> {
        let name = parse_table(table)?;
        if columns.is_empty() {
            return Err(BulkUpError::Configuration(format!(
                "cannot create table '{}' without columns",
                name
            )));
        }

        let mut definitions: Vec<String> = columns
            .iter()
            .map(|column| {
                let mut definition = format!(
                    "{} {}",
                    self.dialect.quote_identifier(&column.name),
                    descriptor_type(column)
                );
                if column.is_identity {
                    definition.push_str(" IDENTITY(0,1)");
                } else if let Some(default) = column.default_value.as_deref().filter(|d| !d.is_empty()) {
                    definition.push_str(" DEFAULT ");
                    definition.push_str(default);
                }
                definition
            })
            .collect();

        let keys: Vec<&str> = columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.as_str())
            .collect();
        if !keys.is_empty() {
            definitions.push(self.primary_key_constraint(&name, &keys));
        }

        Ok(self.render(&name, &definitions))
    }

    /// DDL for a tabular schema
    ///
    /// Auto-increment columns become `IDENTITY(seed,step)`; the row set's
    /// key columns form one clustered constraint in key order.
    pub fn create_from_row_set_sql(&self, table: &str, rows: &RowSet) -> Result<String> {
        let name = parse_table(table)?;
        if rows.columns().is_empty() {
            return Err(BulkUpError::Configuration(format!(
                "cannot create table '{}' without columns",
                name
            )));
        }

        let mut definitions = Vec::with_capacity(rows.columns().len() + 1);
        for column in rows.columns() {
            let mut definition = format!(
                "{} {}",
                self.dialect.quote_identifier(&column.name),
                resolve_sql_type(column)?
            );
            if let Some(auto) = column.auto_increment {
                definition.push_str(&format!(" IDENTITY({},{})", auto.seed, auto.step));
            } else if let Some(default) = column.default_value.as_deref().filter(|d| !d.is_empty()) {
                definition.push_str(" DEFAULT ");
                definition.push_str(default);
            }
            definitions.push(definition);
        }

        let keys: Vec<&str> = rows.primary_key().map(|c| c.name.as_str()).collect();
        if !keys.is_empty() {
            definitions.push(self.primary_key_constraint(&name, &keys));
        }

        Ok(self.render(&name, &definitions))
    }

    /// Column descriptors equivalent to the table `create_from_row_set_sql` creates
    pub fn describe_row_set(&self, rows: &RowSet) -> Result<Vec<ColumnDescriptor>> {
        let keys: Vec<&str> = rows.primary_key().map(|c| c.name.as_str()).collect();
        rows.columns()
            .iter()
            .map(|column| {
                let mut descriptor = resolve_sql_type(column)?.to_descriptor(&column.name);
                descriptor.is_identity = column.auto_increment.is_some();
                descriptor.is_primary_key = keys.contains(&column.name.as_str());
                descriptor.default_value = column.default_value.clone();
                Ok(descriptor)
            })
            .collect()
    }

    fn primary_key_constraint(&self, table: &TableName, keys: &[&str]) -> String {
        format!(
            "CONSTRAINT {} PRIMARY KEY CLUSTERED ({})",
            self.dialect.quote_identifier(&format!("PK_{}", table.name)),
            self.dialect.quote_list(keys)
        )
    }

    fn render(&self, table: &TableName, definitions: &[String]) -> String {
        format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.dialect.quote_parsed_table_name(table),
            definitions.join(",\n    ")
        )
    }
}

fn parse_table(table: &str) -> Result<TableName> {
    TableName::parse(table)
        .ok_or_else(|| BulkUpError::Configuration(format!("invalid table name '{}'", table)))
}

/// The type declaration of an introspected column
fn descriptor_type(column: &ColumnDescriptor) -> String {
    let data_type = column.data_type.to_ascii_lowercase();
    if LENGTH_TYPES.contains(&data_type.as_str()) {
        return match column.char_length {
            -1 => format!("{}(MAX)", column.data_type),
            n if n > 0 => format!("{}({})", column.data_type, n),
            _ => column.data_type.clone(),
        };
    }
    match (data_type.as_str(), column.numeric_precision, column.numeric_scale) {
        ("decimal" | "numeric", Some(p), Some(s)) => format!("{}({},{})", column.data_type, p, s),
        _ => column.data_type.clone(),
    }
}

/// Where a staging table takes its structure from
#[derive(Debug, Clone, Copy)]
pub enum StagingSchema<'a> {
    /// Mirror an inspected destination table
    Columns(&'a [ColumnDescriptor]),
    /// Derive the structure from the rows being loaded
    RowSet(&'a RowSet),
}

/// Create a uniquely named staging table
///
/// The returned guard owns the table. Call [`StagingTable::release`] on every
/// exit path; dropping an unreleased guard schedules a best-effort drop.
#[tracing::instrument(skip(conn, schema))]
pub async fn provision_staging_table(
    conn: &Arc<dyn Connection>,
    schema: StagingSchema<'_>,
) -> Result<StagingTable> {
    let creator = TableCreator::new();
    let name = staging_table_name();
    let (sql, columns) = match schema {
        StagingSchema::Columns(columns) => {
            (creator.create_from_columns_sql(&name, columns)?, columns.to_vec())
        }
        StagingSchema::RowSet(rows) => (
            creator.create_from_row_set_sql(&name, rows)?,
            creator.describe_row_set(rows)?,
        ),
    };

    conn.execute(&sql, &[]).await?;
    tracing::debug!(staging_table = %name, columns = columns.len(), "staging table created");

    Ok(StagingTable {
        name,
        columns,
        conn: Arc::clone(conn),
        released: false,
    })
}

/// Scoped ownership of one staging table
pub struct StagingTable {
    name: String,
    columns: Vec<ColumnDescriptor>,
    conn: Arc<dyn Connection>,
    released: bool,
}

impl StagingTable {
    /// The unquoted generated name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quoted_name(&self) -> String {
        MssqlDialect::new().quote_identifier(&self.name)
    }

    /// Column layout the table was created with
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Drop the table. Safe to call more than once.
    ///
    /// Failures are reported as `Cleanup`; the table is not retried.
    pub async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let sql = drop_statement(&self.name);
        match self.conn.execute(&sql, &[]).await {
            Ok(_) => {
                tracing::debug!(staging_table = %self.name, "staging table dropped");
                Ok(())
            }
            Err(e) => Err(BulkUpError::Cleanup(format!(
                "failed to drop staging table {}: {}",
                self.name, e
            ))),
        }
    }
}

impl Drop for StagingTable {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(staging_table = %self.name, "staging table dropped without release");

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let conn = Arc::clone(&self.conn);
        let name = std::mem::take(&mut self.name);
        handle.spawn(async move {
            if let Err(e) = conn.execute(&drop_statement(&name), &[]).await {
                tracing::warn!(staging_table = %name, error = %e, "deferred staging drop failed");
            }
        });
    }
}

impl fmt::Debug for StagingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingTable")
            .field("name", &self.name)
            .field("columns", &self.columns.len())
            .field("released", &self.released)
            .finish()
    }
}

pub(crate) fn drop_statement(name: &str) -> String {
    let dialect = MssqlDialect::new();
    format!(
        "IF OBJECT_ID({}) IS NOT NULL DROP TABLE {}",
        dialect.quote_string(&format!("tempdb..{}", name)),
        dialect.quote_identifier(name)
    )
}
