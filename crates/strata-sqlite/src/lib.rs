//! SQLite executor for strata, backed by `sqlx`.
//!
//! ```ignore
//! use strata_sqlite::SqliteExecutor;
//!
//! let exec = SqliteExecutor::connect("sqlite:app.db").await?;
//! ```

mod executor;

pub use executor::SqliteExecutor;
