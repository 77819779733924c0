//! Declarative schema synchronization for SQLite-compatible databases.
//!
//! The engine compares a target [`Schema`](strata_core::Schema) with the
//! live catalog and applies the DDL needed to close the gap:
//!
//! - [`introspect`] reads the live structure of the target's tables
//! - [`diff`] plans `CREATE`/`ALTER`/`DROP` statements, falling back to table
//!   recreation when a column cannot be added in place
//! - [`SyncCoordinator`] runs passes, records the applied schema hash in the
//!   database, and collapses concurrent passes for the same database
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use strata_core::{Column, Schema, Table};
//! use strata_sqlite::SqliteExecutor;
//! use strata_sync::SyncCoordinator;
//!
//! let schema = Schema::new("app").table(
//!     Table::new("users")
//!         .column(Column::integer("id").primary_key())
//!         .column(Column::text("email").not_null()),
//! );
//!
//! let executor = Arc::new(SqliteExecutor::connect("sqlite:app.db").await?);
//! let result = SyncCoordinator::new()
//!     .synchronize(executor, &schema, "app.db")
//!     .await?;
//! ```

pub mod coordinator;
pub mod defaults;
pub mod dialect;
pub mod diff;
pub mod error;
pub mod hash;
pub mod introspect;
pub mod schema_file;
pub mod state;

pub use coordinator::{plan, SyncCoordinator};
pub use dialect::SqliteDialect;
pub use diff::{diff, SyncPlan, SyncResult};
pub use error::{Result, SchemaFileError, SyncError};
pub use hash::schema_hash;
pub use introspect::introspect;
pub use schema_file::{load_schema, validate_schema};
pub use state::{StateStore, SyncState};
