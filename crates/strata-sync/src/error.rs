//! Error types for schema synchronization.

use std::path::PathBuf;

use strata_core::ExecutorError;

/// Errors that can occur while planning or applying a synchronization.
///
/// The type is `Clone` because every caller awaiting a shared in-flight
/// synchronization receives its own copy of the outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// A live column disagrees with its target definition.
    #[error("Incompatible column {table}.{column}: {detail}")]
    IncompatibleColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Which property differs, with both values.
        detail: String,
    },

    /// A new column carries constraints that cannot be added in place.
    #[error("Cannot add column {table}.{column} to an existing table: {reason}")]
    UnsafeColumnAddition {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// The offending constraint.
        reason: String,
    },

    /// A DDL statement failed; `applied` lists what ran before it.
    #[error("{source} (after {} applied statement(s))", .applied.len())]
    Execution {
        /// The failing statement and engine message.
        source: ExecutorError,
        /// Statements that succeeded before the failure.
        applied: Vec<String>,
    },

    /// A catalog or bookkeeping query failed.
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// The schema could not be serialized for hashing.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Multiple planning errors occurred.
    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<SyncError>),
}

impl SyncError {
    /// Collapses a list of errors into one, or `None` if the list is empty.
    #[must_use]
    pub fn from_many(mut errors: Vec<Self>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while loading a schema file.
#[derive(Debug, thiserror::Error)]
pub enum SchemaFileError {
    /// IO error reading the file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a valid schema document.
    #[error("Failed to parse schema file '{path}': {message}")]
    Parse {
        /// Path to the schema file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// The schema parsed but is inconsistent.
    #[error("Invalid schema: {0}")]
    Invalid(String),
}
