//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
///
/// Expected per-record and per-table failure modes (constraint violations,
/// validation mismatches, backup corruption) are carried inside result and
/// report structs, not raised through this type. `MigrateError` covers the
/// failures that make an operation itself impossible to run.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(String),

    /// PostgreSQL driver error from the source adapter
    #[error("Source database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Target database error, message as reported by the target
    #[error("Target database error: {0}")]
    Target(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Export failed for a specific table
    #[error("Export failed for table {table}: {message}")]
    Export { table: String, message: String },

    /// Import failed for a specific table
    #[error("Import failed for table {table}: {message}")]
    Import { table: String, message: String },

    /// Validation could not be performed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Backup or restore operation error
    #[error("Backup error: {0}")]
    Backup(String),

    /// Migration history error (script execution, history table access)
    #[error("Migration history error: {0}")]
    History(String),

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
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create an Export error
    pub fn export(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Export {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an Import error
    pub fn import(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Import {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Process exit code for the CLI wrapper.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => 1,
            MigrateError::Source(_) | MigrateError::Postgres(_) | MigrateError::Pool { .. } => 2,
            MigrateError::Target(_) => 3,
            MigrateError::Export { .. } => 4,
            MigrateError::Import { .. } => 5,
            MigrateError::Validation(_) => 6,
            MigrateError::Io(_) => 7,
            MigrateError::Backup(_) => 8,
            MigrateError::History(_) => 9,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("bad".into()).exit_code(), 1);
        assert_eq!(
            MigrateError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")).exit_code(),
            7
        );
        assert_eq!(MigrateError::Backup("corrupt".into()).exit_code(), 8);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::export("users", "connection reset");
        let detailed = err.format_detailed();
        assert!(detailed.contains("users"));
        assert!(detailed.contains("connection reset"));
    }
}
