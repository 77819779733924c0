//! Error types for queries.

use strata_core::ExecutorError;
use thiserror::Error;

/// Query errors.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The executor failed.
    #[error("database error: {0}")]
    Executor(#[from] ExecutorError),

    /// No row matched when exactly one was expected.
    #[error("no row found in '{table}'")]
    NotFound {
        /// Table queried.
        table: String,
    },

    /// Several rows matched when exactly one was expected.
    #[error("{count} rows found in '{table}' when one was expected")]
    NotUnique {
        /// Table queried.
        table: String,
        /// Number of matching rows.
        count: u64,
    },

    /// A raw SQL fragment matched a rejected pattern.
    #[error("unsafe raw fragment '{fragment}': {reason}")]
    UnsafeRawFragment {
        /// The rejected fragment.
        fragment: String,
        /// Which rule rejected it.
        reason: String,
    },

    /// Invalid field name.
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// A delete was issued without any filter.
    #[error("refusing to delete from '{table}' without a filter; use delete_all")]
    UnfilteredDelete {
        /// Table targeted.
        table: String,
    },

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),

    /// The table is not part of the schema.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A relation include could not be resolved.
    #[error("cannot resolve relation '{relation}' from '{table}'")]
    UnknownRelation {
        /// Table the include starts from.
        table: String,
        /// Requested relation.
        relation: String,
    },
}

/// Result type alias for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
