//! [`Executor`] implementation over an sqlx SQLite pool.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column as _, Connection as _, Row as _, Sqlite, TypeInfo as _, ValueRef as _};
use tracing::{debug, warn};

use strata_core::{BatchError, Executor, ExecutorError, Row, SqlValue};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Executes statements on a pooled SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    /// Wraps an existing pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens a pool for `url`, creating the database file if needed.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self { pool })
    }

    /// Opens a private in-memory database.
    ///
    /// Every connection to `:memory:` is a separate database, so the pool
    /// holds exactly one connection and never recycles it.
    pub async fn memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(":memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Executor for SqliteExecutor {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, ExecutorError> {
        debug!(sql, params = params.len(), "query");
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ExecutorError::new(sql, e.to_string()))?;
        rows.iter()
            .map(|row| decode_row(row).map_err(|e| ExecutorError::new(sql, e.to_string())))
            .collect()
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, ExecutorError> {
        debug!(sql, params = params.len(), "execute");
        let result = bind_all(sqlx::query(sql), params)
            .execute(&self.pool)
            .await
            .map_err(|e| ExecutorError::new(sql, e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn first(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, ExecutorError> {
        debug!(sql, params = params.len(), "first");
        let row = bind_all(sqlx::query(sql), params)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ExecutorError::new(sql, e.to_string()))?;
        row.as_ref()
            .map(decode_row)
            .transpose()
            .map_err(|e| ExecutorError::new(sql, e.to_string()))
    }

    /// Pins one pooled connection, turns foreign keys off on it, and runs the
    /// statements in a transaction. A failure rolls everything back.
    async fn execute_isolated(&self, statements: &[String]) -> Result<(), BatchError> {
        let fail = |sql: &str, e: sqlx::Error| BatchError::new(0, ExecutorError::new(sql, e.to_string()));

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| fail("acquire connection", e))?;
        let enforced: i64 = sqlx::query_scalar(PRAGMA_FOREIGN_KEYS)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| fail(PRAGMA_FOREIGN_KEYS, e))?;
        sqlx::query(FOREIGN_KEYS_OFF)
            .execute(&mut *conn)
            .await
            .map_err(|e| fail(FOREIGN_KEYS_OFF, e))?;

        let outcome = run_in_transaction(&mut conn, statements).await;

        // Restore even after a failed batch; the connection goes back to the pool.
        if enforced != 0 {
            let restored = sqlx::query(FOREIGN_KEYS_ON).execute(&mut *conn).await;
            if let (Ok(()), Err(e)) = (&outcome, restored) {
                return Err(BatchError::new(
                    statements.len(),
                    ExecutorError::new(FOREIGN_KEYS_ON, e.to_string()),
                ));
            }
        }
        outcome
    }
}

const PRAGMA_FOREIGN_KEYS: &str = "PRAGMA foreign_keys";
const FOREIGN_KEYS_OFF: &str = "PRAGMA foreign_keys = OFF";
const FOREIGN_KEYS_ON: &str = "PRAGMA foreign_keys = ON";

async fn run_in_transaction(
    conn: &mut sqlx::pool::PoolConnection<Sqlite>,
    statements: &[String],
) -> Result<(), BatchError> {
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| BatchError::new(0, ExecutorError::new("BEGIN", e.to_string())))?;

    for statement in statements {
        debug!(sql = %statement, "execute isolated");
        if let Err(e) = sqlx::query(statement).execute(&mut *tx).await {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback of isolated batch failed");
            }
            return Err(BatchError::new(0, ExecutorError::new(statement.as_str(), e.to_string())));
        }
    }

    tx.commit()
        .await
        .map_err(|e| BatchError::new(0, ExecutorError::new("COMMIT", e.to_string())))
}

fn bind_all<'q>(mut query: SqliteQuery<'q>, params: &[SqlValue]) -> SqliteQuery<'q> {
    for param in params {
        query = bind_param(query, param.clone());
    }
    query
}

fn bind_param(query: SqliteQuery<'_>, value: SqlValue) -> SqliteQuery<'_> {
    match value {
        SqlValue::Null => query.bind(Option::<i64>::None),
        SqlValue::Int(i) => query.bind(i),
        SqlValue::Float(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Blob(b) => query.bind(b),
    }
}

/// Decodes a row using the storage class of each value, not the declared
/// column type.
fn decode_row(row: &SqliteRow) -> Result<Row, sqlx::Error> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let class = raw.type_info().name().to_string();
            match class.as_str() {
                "INTEGER" => SqlValue::Int(row.try_get_unchecked::<i64, _>(i)?),
                "REAL" => SqlValue::Float(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                _ => SqlValue::Text(row.try_get_unchecked::<String, _>(i)?),
            }
        };
        out.push(column.name(), value);
    }
    Ok(out)
}
