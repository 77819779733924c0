//! Persisted synchronization state.
//!
//! This module manages the `_strata_schema_state` table that records, per
//! schema name, the hash of the last schema applied to the database.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strata_core::{Executor, ExecutorError, Row, SqlValue};

/// Name of the bookkeeping table.
pub const STATE_TABLE: &str = "_strata_schema_state";

/// SQL to create the bookkeeping table.
pub const CREATE_STATE_TABLE_SQL: &str = r"
CREATE TABLE IF NOT EXISTS _strata_schema_state (
    schema_name TEXT PRIMARY KEY,
    schema_hash TEXT NOT NULL,
    version INTEGER,
    updated_at INTEGER NOT NULL
)
";

const UPSERT_SQL: &str = "INSERT INTO _strata_schema_state (schema_name, schema_hash, version, updated_at) \
     VALUES (?, ?, ?, ?) \
     ON CONFLICT(schema_name) DO UPDATE SET \
     schema_hash = excluded.schema_hash, \
     version = excluded.version, \
     updated_at = excluded.updated_at";

/// The recorded state of one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncState {
    /// Schema name.
    pub schema_name: String,
    /// Hash of the last applied schema.
    pub schema_hash: String,
    /// Version of the last applied schema.
    pub version: Option<i64>,
    /// When the row was last written, in epoch milliseconds.
    pub updated_at: i64,
}

impl SyncState {
    /// Returns `updated_at` as a timestamp.
    #[must_use]
    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.updated_at)
    }

    fn from_row(row: &Row) -> Option<Self> {
        Some(Self {
            schema_name: row.get_str("schema_name")?.to_string(),
            schema_hash: row.get_str("schema_hash")?.to_string(),
            version: row.get_i64("version"),
            updated_at: row.get_i64("updated_at").unwrap_or(0),
        })
    }
}

/// Reads and writes the bookkeeping table.
pub struct StateStore<'a, E: ?Sized> {
    executor: &'a E,
}

impl<'a, E: Executor + ?Sized> StateStore<'a, E> {
    /// Creates a store over an executor.
    pub const fn new(executor: &'a E) -> Self {
        Self { executor }
    }

    /// Ensures the bookkeeping table exists.
    pub async fn ensure_table(&self) -> Result<(), ExecutorError> {
        self.executor.exec(CREATE_STATE_TABLE_SQL).await?;
        Ok(())
    }

    /// Loads the recorded state of a schema.
    pub async fn load(&self, schema_name: &str) -> Result<Option<SyncState>, ExecutorError> {
        let row = self
            .executor
            .first(
                "SELECT schema_name, schema_hash, version, updated_at \
                 FROM _strata_schema_state WHERE schema_name = ?",
                &[SqlValue::Text(schema_name.to_string())],
            )
            .await?;
        Ok(row.as_ref().and_then(SyncState::from_row))
    }

    /// Records `hash` as the applied state of a schema.
    pub async fn store(
        &self,
        schema_name: &str,
        hash: &str,
        version: Option<i64>,
    ) -> Result<(), ExecutorError> {
        let params = [
            SqlValue::Text(schema_name.to_string()),
            SqlValue::Text(hash.to_string()),
            version.map_or(SqlValue::Null, SqlValue::Int),
            SqlValue::Int(Utc::now().timestamp_millis()),
        ];
        self.executor.execute(UPSERT_SQL, &params).await?;
        Ok(())
    }

    /// Lists every recorded schema.
    pub async fn list(&self) -> Result<Vec<SyncState>, ExecutorError> {
        let rows = self
            .executor
            .query(
                "SELECT schema_name, schema_hash, version, updated_at \
                 FROM _strata_schema_state ORDER BY schema_name",
                &[],
            )
            .await?;
        Ok(rows.iter().filter_map(SyncState::from_row).collect())
    }
}
