//! Error types for BulkUp

use thiserror::Error;

/// Core error type for bulk load and merge operations
#[derive(Error, Debug)]
pub enum BulkUpError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A source column type has no SQL Server type mapping
    #[error("Schema translation error: {0}")]
    SchemaTranslation(String),

    /// The bulk row transfer failed (constraint violation, timeout, type mismatch)
    #[error("Bulk transport failed: {0}")]
    Transport(String),

    /// The merge statement or its commit failed; nothing was committed
    #[error("Merge execution failed: {0}")]
    MergeExecution(String),

    /// Releasing staging resources failed. Never surfaced past the orchestrator.
    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid options file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Result type alias for BulkUp operations
pub type Result<T> = std::result::Result<T, BulkUpError>;
