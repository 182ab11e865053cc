//! Destination table introspection

use bulkup_core::{BulkUpError, ColumnDescriptor, Connection, Result, Row, TableName, Value};

const COLUMNS_QUERY: &str = "SELECT
        c.COLUMN_NAME,
        c.COLUMN_DEFAULT,
        CASE WHEN pk.COLUMN_NAME IS NULL THEN 0 ELSE 1 END AS IsPrimaryKey,
        COLUMNPROPERTY(
            OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)),
            c.COLUMN_NAME,
            'IsIdentity'
        ) AS IsIdentity,
        c.DATA_TYPE,
        c.CHARACTER_MAXIMUM_LENGTH,
        c.NUMERIC_PRECISION,
        c.NUMERIC_SCALE
     FROM INFORMATION_SCHEMA.COLUMNS c
     LEFT JOIN (
         SELECT ku.TABLE_SCHEMA, ku.TABLE_NAME, ku.COLUMN_NAME
         FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
         INNER JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku
             ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME
             AND tc.CONSTRAINT_SCHEMA = ku.CONSTRAINT_SCHEMA
         WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
     ) pk ON pk.TABLE_SCHEMA = c.TABLE_SCHEMA
         AND pk.TABLE_NAME = c.TABLE_NAME
         AND pk.COLUMN_NAME = c.COLUMN_NAME";

/// Reads column metadata for a destination table
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaInspector;

impl SchemaInspector {
    /// Build the catalog query and its parameters for `table`
    ///
    /// Unqualified names resolve against the session's default schema.
    pub(crate) fn columns_query(table: &TableName) -> (String, Vec<Value>) {
        match &table.schema {
            Some(schema) => (
                format!(
                    "{COLUMNS_QUERY}\n     WHERE c.TABLE_NAME = @P1 AND c.TABLE_SCHEMA = @P2\n     ORDER BY c.ORDINAL_POSITION"
                ),
                vec![Value::from(table.name.as_str()), Value::from(schema.as_str())],
            ),
            None => (
                format!(
                    "{COLUMNS_QUERY}\n     WHERE c.TABLE_NAME = @P1 AND c.TABLE_SCHEMA = SCHEMA_NAME()\n     ORDER BY c.ORDINAL_POSITION"
                ),
                vec![Value::from(table.name.as_str())],
            ),
        }
    }

    /// Read the column descriptors of `table` in ordinal order
    ///
    /// A table that does not exist yields an empty list; callers treat that
    /// as "no schema known".
    #[tracing::instrument(skip(conn))]
    pub async fn inspect(conn: &dyn Connection, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let name = TableName::parse(table).ok_or_else(|| {
            BulkUpError::Configuration(format!("invalid table name '{}'", table))
        })?;
        let (sql, params) = Self::columns_query(&name);
        let result = conn.query(&sql, &params).await?;

        let columns: Vec<ColumnDescriptor> = result.rows.iter().map(descriptor_from_row).collect();
        if columns.is_empty() {
            tracing::debug!(table = %name, "table not found, no schema known");
        } else {
            tracing::debug!(table = %name, columns = columns.len(), "inspected table");
        }
        Ok(columns)
    }
}

/// Map one catalog row onto a descriptor
pub(crate) fn descriptor_from_row(row: &Row) -> ColumnDescriptor {
    let name = row
        .get(0)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let default_value = row.get(1).and_then(|v| v.as_str()).map(|s| s.to_string());
    let is_primary_key = row.get(2).and_then(|v| v.as_bool()).unwrap_or(false);
    let is_identity = row.get(3).and_then(|v| v.as_bool()).unwrap_or(false);
    let data_type = row
        .get(4)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let char_length = row.get(5).and_then(|v| v.as_i64()).unwrap_or(0) as i32;
    let numeric_precision = row
        .get(6)
        .and_then(|v| v.as_i64())
        .and_then(|p| u8::try_from(p).ok());
    let numeric_scale = row
        .get(7)
        .and_then(|v| v.as_i64())
        .and_then(|s| u8::try_from(s).ok());

    ColumnDescriptor {
        name,
        default_value,
        is_primary_key,
        is_identity,
        data_type,
        char_length,
        numeric_precision,
        numeric_scale,
    }
}
