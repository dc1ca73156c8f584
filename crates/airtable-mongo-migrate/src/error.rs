//! Error types for the migration library.
//!
//! Only table-level and run-level failures are errors. Problems with a single
//! record or field are recorded as [`crate::report::Anomaly`] values and never
//! surface through this type.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, unknown tables, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport or authentication failure reaching the source. Retryable.
    #[error("Source unavailable for table {table}: {message}")]
    SourceUnavailable { table: String, message: String },

    /// The source answered but refused this one table (not found or not
    /// permitted). Not retryable; only that table fails.
    #[error("Table {table} unavailable: {message}")]
    TableUnavailable { table: String, message: String },

    /// A table could not be completed. The run continues with the next table.
    #[error("Migration failed for table {table}: {message}")]
    TableMigrationFailed { table: String, message: String },

    /// The source or the store could not be reached at all. Aborts the run.
    #[error("Setup failed: {0}")]
    Setup(String),

    /// Destination store error
    #[error("Store error: {0}")]
    Store(String),

    /// MongoDB driver error
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a SourceUnavailable error for a table.
    pub fn source_unavailable(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::SourceUnavailable {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a TableUnavailable error.
    pub fn table_unavailable(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::TableUnavailable {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a TableMigrationFailed error.
    pub fn table_failed(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::TableMigrationFailed {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Store error.
    pub fn store(message: impl Into<String>) -> Self {
        MigrateError::Store(message.into())
    }

    /// Whether the extraction driver should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MigrateError::SourceUnavailable { .. })
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Setup(_) => 3,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
