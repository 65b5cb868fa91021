//! Error types for the import engine.

use thiserror::Error;

/// Main error type for import operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, conflicting options).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Staging, mapping or asset store error (SQLite).
    #[error("Staging database error: {0}")]
    Staging(#[from] rusqlite::Error),

    /// Target database connection or query error.
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Mapping or upload store misuse (poisoned lock, bad stored data).
    #[error("Store error: {0}")]
    Store(String),

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// The step dependency graph contains a cycle.
    #[error("Circular dependency detected between steps: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    /// A step name that is not registered.
    #[error("Unknown step '{0}'")]
    UnknownStep(String),

    /// A shared data key without a registered query.
    #[error("Unknown shared data key '{0}'")]
    UnknownSharedData(String),

    /// The target column type has no binary encoder.
    #[error("Unsupported column type '{data_type}' for {table}.{column}")]
    UnsupportedColumnType {
        table: String,
        column: String,
        data_type: String,
    },

    /// A column declared by a step does not exist in the target table.
    #[error("Column {table}.{column} does not exist in the target database")]
    MissingColumn { table: String, column: String },

    /// A row value could not be encoded for its column.
    #[error("Cannot encode value for {table}.{column}: {reason}")]
    Encode {
        table: String,
        column: String,
        reason: String,
    },

    /// A COPY batch failed and was rolled back.
    #[error("Batch failed for table {table}: {message}")]
    Batch { table: String, message: String },

    /// A step failed outside of the bulk loader.
    #[error("Step {step} failed: {message}")]
    Step { step: String, message: String },

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Batch error.
    pub fn batch(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Batch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Step error.
    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Step {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::CircularDependency(_)
            | MigrateError::UnknownStep(_)
            | MigrateError::UnknownSharedData(_)
            | MigrateError::UnsupportedColumnType { .. }
            | MigrateError::MissingColumn { .. } => 3,
            MigrateError::Staging(_)
            | MigrateError::Target(_)
            | MigrateError::Store(_)
            | MigrateError::Pool { .. }
            | MigrateError::Io(_) => 4,
            MigrateError::Encode { .. }
            | MigrateError::Batch { .. }
            | MigrateError::Step { .. }
            | MigrateError::Json(_) => 5,
        }
    }

    /// Format error with full details including error chain.
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

/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_class() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 2);
        assert_eq!(
            MigrateError::CircularDependency(vec!["a".into(), "b".into()]).exit_code(),
            3
        );
        assert_eq!(MigrateError::batch("users", "boom").exit_code(), 5);
    }

    #[test]
    fn test_circular_dependency_message_lists_steps() {
        let err = MigrateError::CircularDependency(vec!["a".into(), "b".into()]);
        assert_eq!(
            err.to_string(),
            "Circular dependency detected between steps: a, b"
        );
    }
}
