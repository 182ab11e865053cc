//! Connection and operation configuration

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BulkUpError, FieldMapping, Result};

/// Default number of rows per bulk batch
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Default command and copy timeout in seconds
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// Connection settings for a database server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Host address
    pub host: String,
    /// Port number (0 for the driver default)
    pub port: u16,
    /// Database name
    pub database: Option<String>,
    /// Username
    pub username: Option<String>,
    /// Password
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Additional connection parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl ConnectionConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..Default::default()
        }
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Set a connection parameter
    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let str_val = match value.into() {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        self.params.insert(key.to_string(), str_val);
        self
    }

    /// Get a string parameter
    pub fn get_string(&self, key: &str) -> Option<String> {
        if let Some(val) = self.params.get(key) {
            return Some(val.clone());
        }
        match key {
            "host" => Some(self.host.clone()).filter(|h| !h.is_empty()),
            "database" => self.database.clone(),
            "username" | "user" => self.username.clone(),
            "password" => self.password.clone(),
            _ => None,
        }
    }

    /// Get a boolean parameter (`true`/`1`/`yes`)
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.params
            .get(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
    }
}

/// Options for one bulk insert or merge
///
/// Built once and passed whole to the orchestrator:
///
/// ```
/// use bulkup_core::BulkOptions;
///
/// let options = BulkOptions::new("dbo.Users")
///     .with_keys(["Id"])
///     .with_delete(true)
///     .with_delete_predicate("t.[IsArchived] = 0");
///
/// assert_eq!(options.batch_size(), 5000);
/// assert!(options.validate_for_merge().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkOptions {
    /// Destination table, optionally schema-qualified
    table: String,
    /// Key columns used to match staging rows to destination rows
    keys: Vec<String>,
    /// Delete destination rows that are absent from the source
    delete: bool,
    /// Extra condition the delete clause must satisfy, referencing the target as `t`
    delete_predicate: Option<String>,
    /// Only explicit mappings participate in merge column sets
    strict_map: bool,
    mappings: Vec<FieldMapping>,
    exclusions: Vec<FieldMapping>,
    batch_size: usize,
    timeout_seconds: u64,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            table: String::new(),
            keys: Vec::new(),
            delete: false,
            delete_predicate: None,
            strict_map: false,
            mappings: Vec::new(),
            exclusions: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl BulkOptions {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Parse options from a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let options: Self = toml::from_str(source)?;
        Ok(options)
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    pub fn with_delete_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.delete_predicate = Some(predicate.into());
        self
    }

    pub fn with_strict_map(mut self, strict: bool) -> Self {
        self.strict_map = strict;
        self
    }

    pub fn with_mapping(mut self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        self.mappings.push(FieldMapping::new(source, destination));
        self
    }

    pub fn with_exclusion(
        mut self,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        self.exclusions.push(FieldMapping::new(source, destination));
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn delete(&self) -> bool {
        self.delete
    }

    /// The delete predicate, with blank predicates treated as absent
    pub fn delete_predicate(&self) -> Option<&str> {
        self.delete_predicate
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    pub fn strict_map(&self) -> bool {
        self.strict_map
    }

    pub fn mappings(&self) -> &[FieldMapping] {
        &self.mappings
    }

    pub fn exclusions(&self) -> &[FieldMapping] {
        &self.exclusions
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    /// Command and copy timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Check the options needed by a plain bulk insert
    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(BulkUpError::Configuration(
                "destination table is required".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(BulkUpError::Configuration(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(BulkUpError::Configuration(
                "timeout_seconds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Check the options needed by a merge
    pub fn validate_for_merge(&self) -> Result<()> {
        self.validate()?;
        if self.keys.is_empty() {
            return Err(BulkUpError::Configuration(
                "merge requires at least one key column".to_string(),
            ));
        }
        if let Some(blank) = self.keys.iter().find(|k| k.trim().is_empty()) {
            return Err(BulkUpError::Configuration(format!(
                "key column name '{}' is blank",
                blank
            )));
        }
        Ok(())
    }
}
