//! Core types shared by the strata crates.
//!
//! - [`schema`]: the declarative table model
//! - [`types`]: canonical type <-> declared type mapping
//! - [`value`]: parameter and row values
//! - [`executor`]: the async statement executor trait
//! - [`ident`]: identifier quoting

pub mod executor;
pub mod ident;
pub mod schema;
pub mod types;
pub mod value;

pub use executor::{BatchError, Executor, ExecutorError};
pub use ident::{quote_identifier, render_qualified, render_identifier};
pub use schema::{
    Column, ColumnMode, ColumnType, DefaultValue, ForeignKey, ForeignKeyAction, Index, Schema,
    Table,
};
pub use types::{declared_type, declared_type_of, infer_type, storage_compatible};
pub use value::{Row, SqlValue, ToSqlValue};
