//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] rusqlite::Error),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] mysql_async::Error),

    /// Source catalog unreadable or inconsistent.
    ///
    /// Fatal: raised before any write to the target.
    #[error("Schema read failed: {0}")]
    SchemaRead(String),

    /// A declared source type could not be mapped to a target type.
    #[error("Type mapping failed for {table}.{column}: {message}")]
    TypeMapping {
        table: String,
        column: String,
        message: String,
    },

    /// A row value does not fit the column's committed target type.
    #[error(
        "Value conversion failed for {table}.{column} at row {row_offset}: \
         cannot coerce {value} to {target_type}"
    )]
    ValueConversion {
        table: String,
        column: String,
        row_offset: u64,
        value: String,
        target_type: String,
    },

    /// A write to the target failed (DDL, batch insert, connection loss).
    #[error("Target write failed for table {table} (batch offset {batch_offset}): {message}")]
    TargetWrite {
        table: String,
        batch_offset: u64,
        message: String,
    },

    /// Index or foreign key creation failed after data load.
    #[error("Constraint creation failed: {statement}: {message}")]
    ConstraintCreation { statement: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a SchemaRead error.
    pub fn schema_read(message: impl Into<String>) -> Self {
        MigrateError::SchemaRead(message.into())
    }

    /// Create a TargetWrite error.
    pub fn target_write(
        table: impl Into<String>,
        batch_offset: u64,
        message: impl Into<String>,
    ) -> Self {
        MigrateError::TargetWrite {
            table: table.into(),
            batch_offset,
            message: message.into(),
        }
    }

    /// Whether a retry at batch granularity is worthwhile.
    ///
    /// Only network-level failures qualify; constraint violations and
    /// malformed statements will fail identically on a second attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, MigrateError::Target(mysql_async::Error::Io(_)))
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        // Add error chain for wrapped errors
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
