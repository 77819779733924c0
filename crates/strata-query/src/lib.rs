//! Runtime query compilation for strata schemas.
//!
//! [`Database`] holds one [`TableClient`] per table of a schema. Each client
//! starts [`QueryBuilder`]s whose filters compile to parameterized SQL:
//!
//! ```ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use strata_query::{Database, Filter, Include};
//!
//! let db = Database::new(executor, schema);
//! let posts = db.table("posts")?;
//!
//! let recent = posts
//!     .filter(Filter::new().value("published", true))
//!     .filter_any([
//!         Filter::new().value("title", "%rust%"),
//!         Filter::new().gte("score", 10),
//!     ])
//!     .order_by("-created_at")
//!     .limit(20)
//!     .include(Include::auto("user"))
//!     .many()
//!     .await?;
//!
//! let stored = posts
//!     .insert_one(json!({"title": "hi", "tags": ["a"]}).as_object().unwrap())
//!     .await?;
//! ```
//!
//! Records are JSON objects. Columns declared as JSON are serialized before
//! binding and parsed after reading.

pub mod builder;
pub mod client;
pub mod error;
pub mod filter;
pub mod record;
pub mod relation;

pub use builder::QueryBuilder;
pub use client::{Database, TableClient};
pub use error::{QueryError, Result};
pub use filter::{compile, is_identifier, Condition, Filter, Predicate, RawFragment, WhereGroup};
pub use record::{json_to_sql, row_to_record, sql_to_json, Record};
pub use relation::{Direction, Include};
