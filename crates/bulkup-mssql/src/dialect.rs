//! T-SQL quoting for generated statements
//!
//! Every identifier that reaches generated SQL goes through `MssqlDialect`,
//! so reserved words and embedded punctuation never break a statement.

use bulkup_core::{BulkUpError, Result, TableName};

/// T-SQL dialect helpers
///
/// # Example
///
/// ```
/// use bulkup_mssql::MssqlDialect;
///
/// let dialect = MssqlDialect::new();
///
/// assert_eq!(dialect.quote_identifier("order"), "[order]");
/// assert_eq!(dialect.quote_table_name("dbo.Order Items").unwrap(), "[dbo].[Order Items]");
/// assert_eq!(dialect.quote_string("it's"), "'it''s'");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    pub fn new() -> Self {
        Self
    }

    /// Quote an identifier using SQL Server's square bracket syntax
    ///
    /// Closing brackets inside the identifier are doubled.
    ///
    /// ```
    /// use bulkup_mssql::MssqlDialect;
    ///
    /// let dialect = MssqlDialect::new();
    /// assert_eq!(dialect.quote_identifier("users"), "[users]");
    /// assert_eq!(dialect.quote_identifier("user[data]"), "[user[data]]]");
    /// ```
    pub fn quote_identifier(&self, ident: &str) -> String {
        let escaped = ident.replace(']', "]]");
        format!("[{}]", escaped)
    }

    /// Quote a possibly schema-qualified table name, one part at a time
    pub fn quote_table_name(&self, table: &str) -> Result<String> {
        let name = TableName::parse(table).ok_or_else(|| {
            BulkUpError::Configuration(format!("invalid table name '{}'", table))
        })?;
        Ok(self.quote_parsed_table_name(&name))
    }

    pub(crate) fn quote_parsed_table_name(&self, name: &TableName) -> String {
        match &name.schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(&name.name)
            ),
            None => self.quote_identifier(&name.name),
        }
    }

    /// Quote a string literal using single quotes, doubling embedded quotes
    pub fn quote_string(&self, s: &str) -> String {
        let escaped = s.replace('\'', "''");
        format!("'{}'", escaped)
    }

    /// Quote each name and join them with `, `
    pub(crate) fn quote_list<S: AsRef<str>>(&self, names: &[S]) -> String {
        names
            .iter()
            .map(|n| self.quote_identifier(n.as_ref()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
