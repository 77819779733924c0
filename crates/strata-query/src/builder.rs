//! The chainable query builder.
//!
//! A builder targets one table and accumulates OR-groups of conditions,
//! ordering, a page window, a projection and relation includes. Nothing runs
//! until a terminal method (`many`, `first`, `count`, `delete`, ...) is
//! awaited.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use strata_core::{render_identifier, render_qualified, Executor, Schema, SqlValue, Table};
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::filter::{check_identifier, compile, Filter, RawFragment, WhereGroup};
use crate::record::{prepare_write, row_to_record, sql_to_json, Record};
use crate::relation::{attach, Include};

/// One `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OrderBy {
    column: String,
    descending: bool,
}

/// Query builder for one table.
pub struct QueryBuilder<E: ?Sized> {
    executor: Arc<E>,
    table: String,
    schema: Option<Arc<Schema>>,
    groups: Vec<WhereGroup>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    select: Vec<String>,
    includes: Vec<Include>,
}

impl<E: ?Sized> Clone for QueryBuilder<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            table: self.table.clone(),
            schema: self.schema.clone(),
            groups: self.groups.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            select: self.select.clone(),
            includes: self.includes.clone(),
        }
    }
}

impl<E: ?Sized> fmt::Debug for QueryBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("table", &self.table)
            .field("groups", &self.groups)
            .field("order_by", &self.order_by)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("select", &self.select)
            .field("includes", &self.includes)
            .finish_non_exhaustive()
    }
}

impl<E: Executor + ?Sized> QueryBuilder<E> {
    /// Creates a builder without a table definition.
    ///
    /// Values are bound as given and read back by storage class only.
    pub fn new(executor: Arc<E>, table: impl Into<String>) -> Self {
        Self {
            executor,
            table: table.into(),
            schema: None,
            groups: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            select: Vec::new(),
            includes: Vec::new(),
        }
    }

    /// Attaches the schema the table belongs to.
    ///
    /// JSON and boolean columns are then converted transparently, unknown
    /// insert fields are dropped, and includes resolve against the schema.
    #[must_use]
    pub fn with_schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Returns the target table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn definition(&self) -> Option<&Table> {
        self.schema.as_deref().and_then(|s| s.get_table(&self.table))
    }

    fn and_group(mut self, group: &WhereGroup) -> Self {
        if self.groups.is_empty() {
            self.groups.push(group.clone());
        } else {
            self.groups = self.groups.into_iter().map(|g| g.and(group)).collect();
        }
        self
    }

    /// ANDs a filter into the query.
    #[must_use]
    pub fn filter(self, filter: Filter) -> Self {
        self.and_group(&WhereGroup::from_filter(filter))
    }

    /// ANDs a filter given in its JSON object form.
    pub fn filter_json(self, filter: &Value) -> Result<Self> {
        Ok(self.filter(Filter::from_json(filter)?))
    }

    /// ANDs a disjunction: a row matches if it matches any of `filters`.
    ///
    /// Existing OR-groups are multiplied out, so
    /// `filter(a).filter_any([b, c])` reads `(a AND b) OR (a AND c)`. An
    /// empty list adds nothing.
    #[must_use]
    pub fn filter_any(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        let alternatives: Vec<WhereGroup> =
            filters.into_iter().map(WhereGroup::from_filter).collect();
        if alternatives.is_empty() {
            return self;
        }

        let base = if self.groups.is_empty() {
            vec![WhereGroup::default()]
        } else {
            std::mem::take(&mut self.groups)
        };
        self.groups = base
            .iter()
            .flat_map(|g| alternatives.iter().map(move |alt| g.clone().and(alt)))
            .collect();
        self
    }

    /// ANDs a raw SQL fragment with its own parameters into every OR-group.
    pub fn raw(self, sql: &str, params: Vec<SqlValue>) -> Result<Self> {
        let fragment = RawFragment::new(sql, params)?;
        Ok(self.and_group(&WhereGroup {
            filter: Filter::new(),
            raw: vec![fragment],
        }))
    }

    /// Adds ordering. Columns are comma-separated; a leading `-` sorts
    /// descending (`"-created_at,name"`).
    #[must_use]
    pub fn order_by(mut self, spec: &str) -> Self {
        for term in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (column, descending) = term
                .strip_prefix('-')
                .map_or((term, false), |rest| (rest, true));
            self.order_by.push(OrderBy {
                column: column.to_string(),
                descending,
            });
        }
        self
    }

    /// Limits the number of rows.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips rows. With a limit, this is a 1-based page number instead.
    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Restricts the selected columns.
    #[must_use]
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Attaches related rows to every fetched row.
    #[must_use]
    pub fn include(mut self, include: Include) -> Self {
        self.includes.push(include);
        self
    }

    /// The `LIMIT` and `OFFSET` actually sent.
    fn window(&self) -> (Option<u64>, Option<u64>) {
        let offset = match (self.limit, self.offset) {
            (Some(limit), Some(page)) => Some(page.saturating_sub(1).saturating_mul(limit)),
            (None, offset) => offset,
            (Some(_), None) => None,
        };
        (self.limit, offset.filter(|o| *o > 0))
    }

    fn table_sql(&self) -> Result<String> {
        check_identifier(&self.table)?;
        Ok(render_qualified(&self.table))
    }

    fn where_clause(&self) -> Result<(String, Vec<SqlValue>)> {
        Ok(match compile(&self.groups)? {
            Some((sql, params)) => (format!(" WHERE {sql}"), params),
            None => (String::new(), Vec::new()),
        })
    }

    fn order_clause(&self) -> Result<String> {
        if self.order_by.is_empty() {
            return Ok(String::new());
        }
        let mut terms = Vec::with_capacity(self.order_by.len());
        for order in &self.order_by {
            check_identifier(&order.column)?;
            let column = render_qualified(&order.column);
            terms.push(if order.descending {
                format!("{column} DESC")
            } else {
                column
            });
        }
        Ok(format!(" ORDER BY {}", terms.join(", ")))
    }

    fn render_select(&self, limit: Option<u64>) -> Result<(String, Vec<SqlValue>)> {
        let table = self.table_sql()?;
        let columns = if self.select.is_empty() {
            "*".to_string()
        } else {
            let mut rendered = Vec::with_capacity(self.select.len());
            for column in &self.select {
                check_identifier(column)?;
                rendered.push(render_qualified(column));
            }
            rendered.join(", ")
        };

        let (where_sql, params) = self.where_clause()?;
        let mut sql = format!("SELECT {columns} FROM {table}{where_sql}");
        sql.push_str(&self.order_clause()?);

        let (own_limit, offset) = self.window();
        match (limit.or(own_limit), offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        Ok((sql, params))
    }

    /// Builds the `SELECT` statement.
    pub fn build_select(&self) -> Result<(String, Vec<SqlValue>)> {
        self.render_select(None)
    }

    /// Builds the `COUNT(*)` statement. Ordering and paging are ignored.
    pub fn build_count(&self) -> Result<(String, Vec<SqlValue>)> {
        let table = self.table_sql()?;
        let (where_sql, params) = self.where_clause()?;
        Ok((format!("SELECT COUNT(*) AS count FROM {table}{where_sql}"), params))
    }

    /// Builds the `EXISTS` statement.
    pub fn build_exists(&self) -> Result<(String, Vec<SqlValue>)> {
        let table = self.table_sql()?;
        let (where_sql, params) = self.where_clause()?;
        Ok((
            format!("SELECT EXISTS(SELECT 1 FROM {table}{where_sql}) AS found"),
            params,
        ))
    }

    /// Builds the `DELETE` statement. Fails without a filter.
    pub fn build_delete(&self) -> Result<(String, Vec<SqlValue>)> {
        let table = self.table_sql()?;
        match compile(&self.groups)? {
            Some((sql, params)) => Ok((format!("DELETE FROM {table} WHERE {sql}"), params)),
            None => Err(QueryError::UnfilteredDelete {
                table: self.table.clone(),
            }),
        }
    }

    async fn load(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
        let definition = self.definition();
        let mut records: Vec<Record> = self
            .executor
            .query(sql, params)
            .await?
            .into_iter()
            .map(|row| row_to_record(row, definition))
            .collect();

        for include in &self.includes {
            attach(
                self.executor.as_ref(),
                self.schema.as_deref(),
                &self.table,
                &mut records,
                include,
            )
            .await?;
        }
        Ok(records)
    }

    /// Fetches every matching row.
    pub async fn many(&self) -> Result<Vec<Record>> {
        let (sql, params) = self.build_select()?;
        self.load(&sql, &params).await
    }

    /// Fetches the first matching row, if any.
    pub async fn first(&self) -> Result<Option<Record>> {
        let (sql, params) = self.render_select(Some(1))?;
        let Some(row) = self.executor.first(&sql, &params).await? else {
            return Ok(None);
        };

        let mut records = vec![row_to_record(row, self.definition())];
        for include in &self.includes {
            attach(
                self.executor.as_ref(),
                self.schema.as_deref(),
                &self.table,
                &mut records,
                include,
            )
            .await?;
        }
        Ok(records.pop())
    }

    /// Fetches exactly one row.
    ///
    /// Returns [`QueryError::NotFound`] when nothing matches and
    /// [`QueryError::NotUnique`] with the number of matches when several do.
    pub async fn one(&self) -> Result<Record> {
        let (sql, params) = self.render_select(Some(2))?;
        let mut records = self.load(&sql, &params).await?;
        match records.len() {
            0 => Err(QueryError::NotFound {
                table: self.table.clone(),
            }),
            1 => Ok(records.remove(0)),
            _ => Err(QueryError::NotUnique {
                table: self.table.clone(),
                count: self.count().await?,
            }),
        }
    }

    /// Returns whether any row matches.
    pub async fn exists(&self) -> Result<bool> {
        let (sql, params) = self.build_exists()?;
        let row = self.executor.first(&sql, &params).await?;
        Ok(row
            .as_ref()
            .and_then(|r| r.first_value())
            .and_then(SqlValue::as_i64)
            .is_some_and(|n| n != 0))
    }

    /// Counts matching rows.
    pub async fn count(&self) -> Result<u64> {
        let (sql, params) = self.build_count()?;
        let row = self.executor.first(&sql, &params).await?;
        let count = row
            .as_ref()
            .and_then(|r| r.first_value())
            .and_then(SqlValue::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Returns the distinct values of one column among matching rows.
    pub async fn distinct(&self, column: &str) -> Result<Vec<Value>> {
        let table = self.table_sql()?;
        check_identifier(column)?;
        let (where_sql, params) = self.where_clause()?;
        let sql = format!(
            "SELECT DISTINCT {} FROM {table}{where_sql}{}",
            render_qualified(column),
            self.order_clause()?
        );

        let definition = self.definition().and_then(|t| t.get_column(column));
        Ok(self
            .executor
            .query(&sql, &params)
            .await?
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .map(|(_, value)| sql_to_json(value, definition))
            .collect())
    }

    fn set_clause(&self, changes: &Record) -> Result<(String, Vec<SqlValue>)> {
        let (columns, params) = prepare_write(changes, &self.table, self.definition())?;
        if columns.is_empty() {
            return Err(QueryError::Validation(format!(
                "no columns of '{}' to update",
                self.table
            )));
        }
        let assignments: Vec<String> = columns
            .iter()
            .map(|c| format!("{} = ?", render_identifier(c)))
            .collect();
        Ok((assignments.join(", "), params))
    }

    /// Updates the first matching row by primary key.
    ///
    /// The key is looked up first, then a keyed `UPDATE` runs. Without a
    /// single-column primary key this is [`update_many`](Self::update_many).
    /// Fails without a filter; nothing is sent.
    pub async fn update(&self, changes: &Record) -> Result<u64> {
        if self.groups.iter().all(WhereGroup::is_empty) {
            return Err(QueryError::Validation(format!(
                "refusing to update a row of '{}' without a filter",
                self.table
            )));
        }
        let Some(pk) = self.definition().and_then(Table::primary_key) else {
            return self.update_many(changes).await;
        };
        let pk = pk.name.clone();

        let (sql, params) = self.clone().select(&[pk.as_str()]).render_select(Some(1))?;
        let Some(key) = self
            .executor
            .first(&sql, &params)
            .await?
            .and_then(|row| row.into_iter().next())
            .map(|(_, value)| value)
        else {
            return Ok(0);
        };

        let (set_sql, mut params) = self.set_clause(changes)?;
        params.push(key);
        let sql = format!(
            "UPDATE {} SET {set_sql} WHERE {} = ?",
            self.table_sql()?,
            render_identifier(&pk)
        );
        debug!(table = %self.table, "updating one row");
        Ok(self.executor.execute(&sql, &params).await?)
    }

    /// Updates every matching row. Fails without a filter.
    pub async fn update_many(&self, changes: &Record) -> Result<u64> {
        let table = self.table_sql()?;
        let Some((where_sql, where_params)) = compile(&self.groups)? else {
            return Err(QueryError::Validation(format!(
                "refusing to update every row of '{}' without a filter",
                self.table
            )));
        };

        let (set_sql, mut params) = self.set_clause(changes)?;
        params.extend(where_params);
        let sql = format!("UPDATE {table} SET {set_sql} WHERE {where_sql}");
        Ok(self.executor.execute(&sql, &params).await?)
    }

    /// Deletes matching rows. Fails without a filter; nothing is sent.
    pub async fn delete(&self) -> Result<u64> {
        let (sql, params) = self.build_delete()?;
        debug!(table = %self.table, "deleting rows");
        Ok(self.executor.execute(&sql, &params).await?)
    }

    /// Inserts one row and returns it as stored.
    pub async fn insert_one(&self, record: &Record) -> Result<Record> {
        let table = self.table_sql()?;
        let (columns, params) = prepare_write(record, &self.table, self.definition())?;
        let sql = if columns.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES RETURNING *")
        } else {
            let placeholders = vec!["?"; columns.len()].join(", ");
            let columns: Vec<String> = columns.iter().map(|c| render_identifier(c)).collect();
            format!(
                "INSERT INTO {table} ({}) VALUES ({placeholders}) RETURNING *",
                columns.join(", ")
            )
        };

        let row = self
            .executor
            .first(&sql, &params)
            .await?
            .ok_or_else(|| QueryError::NotFound {
                table: self.table.clone(),
            })?;
        Ok(row_to_record(row, self.definition()))
    }

    /// Inserts rows one statement at a time and returns them as stored.
    pub async fn insert(&self, records: &[Record]) -> Result<Vec<Record>> {
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            stored.push(self.insert_one(record).await?);
        }
        Ok(stored)
    }
}
