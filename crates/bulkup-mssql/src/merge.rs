//! MERGE statement synthesis

use bulkup_core::{BulkUpError, MergeColumns, Result};

use crate::MssqlDialect;

/// One set-based MERGE of a staging table into a destination table
///
/// ```
/// use bulkup_core::MergeColumns;
/// use bulkup_mssql::MergeStatement;
///
/// let columns = MergeColumns {
///     update: vec!["Name".into()],
///     insert: vec!["Id".into(), "Name".into()],
/// };
/// let merge = MergeStatement::build(
///     "dbo.Users",
///     "##Tstage",
///     &["Id".to_string()],
///     &columns,
///     false,
///     None,
/// )
/// .unwrap();
///
/// let sql = merge.to_sql();
/// assert!(sql.starts_with("MERGE INTO [dbo].[Users] AS t"));
/// assert!(sql.contains("ON (t.[Id] = s.[Id])"));
/// assert!(!sql.contains("DELETE"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStatement {
    target: String,
    source: String,
    keys: Vec<String>,
    update: Vec<String>,
    insert: Vec<String>,
    delete: bool,
    delete_predicate: Option<String>,
}

impl MergeStatement {
    /// Validate the column sets and quote the table names
    ///
    /// Key columns are dropped from the update set. An empty update set
    /// leaves out the matched clause; an empty key or insert set is an error.
    pub fn build(
        target_table: &str,
        staging_table: &str,
        keys: &[String],
        columns: &MergeColumns,
        delete: bool,
        delete_predicate: Option<&str>,
    ) -> Result<Self> {
        if keys.is_empty() {
            return Err(BulkUpError::Configuration(format!(
                "merge into {} needs at least one key column",
                target_table
            )));
        }
        if columns.insert.is_empty() {
            return Err(BulkUpError::Configuration(format!(
                "merge into {} has no insertable columns; every column is excluded or generated",
                target_table
            )));
        }

        let dialect = MssqlDialect::new();
        let update = columns
            .update
            .iter()
            .filter(|column| !keys.iter().any(|k| k.eq_ignore_ascii_case(column)))
            .cloned()
            .collect();

        Ok(Self {
            target: dialect.quote_table_name(target_table)?,
            source: dialect.quote_table_name(staging_table)?,
            keys: keys.to_vec(),
            update,
            insert: columns.insert.clone(),
            delete,
            delete_predicate: delete_predicate
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from),
        })
    }

    pub fn update_columns(&self) -> &[String] {
        &self.update
    }

    pub fn insert_columns(&self) -> &[String] {
        &self.insert
    }

    /// Render the statement text
    pub fn to_sql(&self) -> String {
        let dialect = MssqlDialect::new();

        let on = self
            .keys
            .iter()
            .map(|k| {
                let column = dialect.quote_identifier(k);
                format!("t.{column} = s.{column}")
            })
            .collect::<Vec<_>>()
            .join(" AND ");

        let mut sql = format!(
            "MERGE INTO {} AS t\nUSING {} AS s\n    ON ({})\n",
            self.target, self.source, on
        );

        if !self.update.is_empty() {
            let assignments = self
                .update
                .iter()
                .map(|c| {
                    let column = dialect.quote_identifier(c);
                    format!("{column} = s.{column}")
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!("WHEN MATCHED THEN\n    UPDATE SET {}\n", assignments));
        }

        let values = self
            .insert
            .iter()
            .map(|c| format!("s.{}", dialect.quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(
            "WHEN NOT MATCHED BY TARGET THEN\n    INSERT ({}) VALUES ({})\n",
            dialect.quote_list(&self.insert),
            values
        ));

        if self.delete {
            match &self.delete_predicate {
                Some(predicate) => sql.push_str(&format!(
                    "WHEN NOT MATCHED BY SOURCE AND ({}) THEN\n    DELETE\n",
                    predicate
                )),
                None => sql.push_str("WHEN NOT MATCHED BY SOURCE THEN\n    DELETE\n"),
            }
        }

        // MERGE must be terminated
        sql.truncate(sql.trim_end().len());
        sql.push(';');
        sql
    }
}
