//! Schema-aware table clients.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use strata_core::{render_qualified, Executor, Schema, Table, ToSqlValue};
use tracing::warn;

use crate::builder::QueryBuilder;
use crate::error::{QueryError, Result};
use crate::filter::{check_identifier, Filter};
use crate::record::Record;

/// Operations on one table of a schema.
pub struct TableClient<E: ?Sized> {
    executor: Arc<E>,
    schema: Arc<Schema>,
    position: usize,
}

impl<E: ?Sized> fmt::Debug for TableClient<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableClient")
            .field("table", &self.definition().name)
            .finish_non_exhaustive()
    }
}

impl<E: ?Sized> TableClient<E> {
    /// Returns the table definition.
    #[must_use]
    pub fn definition(&self) -> &Table {
        &self.schema.tables[self.position]
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition().name
    }
}

impl<E: Executor + ?Sized> TableClient<E> {
    /// Starts a query on this table.
    #[must_use]
    pub fn query(&self) -> QueryBuilder<E> {
        QueryBuilder::new(Arc::clone(&self.executor), self.name())
            .with_schema(Arc::clone(&self.schema))
    }

    /// Starts a query with a filter.
    #[must_use]
    pub fn filter(&self, filter: Filter) -> QueryBuilder<E> {
        self.query().filter(filter)
    }

    /// Fetches a row by primary key.
    pub async fn find(&self, key: impl ToSqlValue) -> Result<Option<Record>> {
        let pk = self.definition().primary_key().ok_or_else(|| {
            QueryError::Validation(format!(
                "table '{}' has no single-column primary key",
                self.name()
            ))
        })?;
        self.filter(Filter::new().eq(&pk.name, key)).first().await
    }

    /// Inserts one row. Unknown fields are dropped.
    pub async fn insert_one(&self, record: &Record) -> Result<Record> {
        self.query().insert_one(record).await
    }

    /// Inserts rows. Unknown fields are dropped.
    pub async fn insert(&self, records: &[Record]) -> Result<Vec<Record>> {
        self.query().insert(records).await
    }

    /// Deletes every row of the table.
    pub async fn delete_all(&self) -> Result<u64> {
        check_identifier(self.name())?;
        warn!(table = %self.name(), "deleting every row");
        let sql = format!("DELETE FROM {}", render_qualified(self.name()));
        Ok(self.executor.execute(&sql, &[]).await?)
    }
}

/// One client per table of a schema, built up front.
pub struct Database<E: ?Sized> {
    schema: Arc<Schema>,
    tables: BTreeMap<String, TableClient<E>>,
}

impl<E: ?Sized> fmt::Debug for Database<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("schema", &self.schema.name)
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<E: Executor + ?Sized> Database<E> {
    /// Builds a client for every table of `schema`.
    pub fn new(executor: Arc<E>, schema: Schema) -> Self {
        let schema = Arc::new(schema);
        let tables = schema
            .tables
            .iter()
            .enumerate()
            .map(|(position, table)| {
                let client = TableClient {
                    executor: Arc::clone(&executor),
                    schema: Arc::clone(&schema),
                    position,
                };
                (table.name.clone(), client)
            })
            .collect();
        Self { schema, tables }
    }

    /// Returns the client for a table.
    pub fn table(&self, name: &str) -> Result<&TableClient<E>> {
        self.tables
            .get(name)
            .ok_or_else(|| QueryError::UnknownTable(name.to_string()))
    }

    /// Iterates over the clients in table name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableClient<E>> {
        self.tables.values()
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}
