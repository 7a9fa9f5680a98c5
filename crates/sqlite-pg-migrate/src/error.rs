//! Error types for the migration library.

use thiserror::Error;

use crate::coerce::CoercionError;

/// Exit code for configuration errors (invalid YAML, missing fields).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when the source or target cannot be reached.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for source database errors outside of a table migration.
pub const EXIT_SOURCE_ERROR: u8 = 3;
/// Exit code for target database errors outside of a table migration.
pub const EXIT_TARGET_ERROR: u8 = 4;
/// Exit code when at least one table failed to migrate.
pub const EXIT_TABLES_FAILED: u8 = 5;
/// Exit code when the run was cancelled between tables.
pub const EXIT_CANCELLED: u8 = 6;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source or target could not be reached. Fatal for the whole run.
    #[error("Connection error ({endpoint}): {message}")]
    Connection { endpoint: String, message: String },

    /// Source database query error
    #[error("Source database error: {0}")]
    Source(#[from] tokio_rusqlite::Error),

    /// Target database query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Target rejected the CREATE TABLE statement
    #[error("Schema creation failed for table {table}: {message}")]
    SchemaCreation { table: String, message: String },

    /// A row value could not be converted without loss
    #[error("Coercion failed for {table}.{column} (row {row}): {source}")]
    Coercion {
        table: String,
        column: String,
        row: u64,
        #[source]
        source: CoercionError,
    },

    /// Target rejected the inserted rows or the commit
    #[error("Commit failed for table {table}: {message}")]
    Commit { table: String, message: String },

    /// The run finished but some tables failed
    #[error("{} table(s) failed to migrate: {}", .0.len(), .0.join(", "))]
    TablesFailed(Vec<String>),

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
    /// Create a Connection error for the given endpoint.
    pub fn connection(endpoint: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a SchemaCreation error
    pub fn schema_creation(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::SchemaCreation {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a Commit error
    pub fn commit(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Commit {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Connection { .. } | MigrateError::Pool { .. } => EXIT_CONNECTION_ERROR,
            MigrateError::Source(_) => EXIT_SOURCE_ERROR,
            MigrateError::Target(_) | MigrateError::Json(_) => EXIT_TARGET_ERROR,
            MigrateError::SchemaCreation { .. }
            | MigrateError::Coercion { .. }
            | MigrateError::Commit { .. }
            | MigrateError::TablesFailed(_) => EXIT_TABLES_FAILED,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
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
