//! The statement executor seam.
//!
//! Everything above this trait is engine agnostic. An implementation only has
//! to run one statement at a time with positional `?` parameters.

use async_trait::async_trait;

use crate::value::{Row, SqlValue};

/// A statement failed inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("statement failed: {message} ({statement})")]
pub struct ExecutorError {
    /// The SQL text that failed.
    pub statement: String,
    /// Engine error message.
    pub message: String,
}

impl ExecutorError {
    /// Creates a new executor error.
    pub fn new(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            message: message.into(),
        }
    }
}

/// A statement of an isolated batch failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{source}")]
pub struct BatchError {
    /// Number of leading statements whose effects remain in the database.
    pub applied: usize,
    /// The failure.
    pub source: ExecutorError,
}

impl BatchError {
    /// Creates a batch error.
    #[must_use]
    pub const fn new(applied: usize, source: ExecutorError) -> Self {
        Self { applied, source }
    }
}

/// Runs SQL against a SQLite-compatible engine.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs a statement and returns every result row.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, ExecutorError>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, ExecutorError>;

    /// Runs a statement and returns the first row, if any.
    async fn first(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, ExecutorError> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Runs a parameterless statement.
    async fn exec(&self, sql: &str) -> Result<u64, ExecutorError> {
        self.execute(sql, &[]).await
    }

    /// Runs statements in order with foreign key enforcement switched off,
    /// then restores the previous setting.
    ///
    /// Dropping a referenced table would otherwise cascade into its children.
    /// The default issues the pragmas through [`exec`](Self::exec), which
    /// only holds for executors bound to one connection. Pooled executors
    /// override it to pin a connection and wrap the batch in a transaction.
    async fn execute_isolated(&self, statements: &[String]) -> Result<(), BatchError> {
        let enforced = self
            .first("PRAGMA foreign_keys", &[])
            .await
            .map_err(|e| BatchError::new(0, e))?
            .and_then(|row| row.first_value().and_then(SqlValue::as_i64))
            .is_some_and(|v| v != 0);
        if enforced {
            self.exec("PRAGMA foreign_keys = OFF")
                .await
                .map_err(|e| BatchError::new(0, e))?;
        }

        let mut outcome = Ok(());
        for (applied, statement) in statements.iter().enumerate() {
            if let Err(e) = self.exec(statement).await {
                outcome = Err(BatchError::new(applied, e));
                break;
            }
        }

        if enforced {
            let restored = self.exec("PRAGMA foreign_keys = ON").await;
            if let (Ok(()), Err(e)) = (&outcome, restored) {
                return Err(BatchError::new(statements.len(), e));
            }
        }
        outcome
    }
}

#[async_trait]
impl<E: Executor + ?Sized> Executor for std::sync::Arc<E> {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, ExecutorError> {
        (**self).query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, ExecutorError> {
        (**self).execute(sql, params).await
    }

    async fn first(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, ExecutorError> {
        (**self).first(sql, params).await
    }

    async fn execute_isolated(&self, statements: &[String]) -> Result<(), BatchError> {
        (**self).execute_isolated(statements).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Vec<Row>);

    #[async_trait]
    impl Executor for Canned {
        async fn query(&self, _sql: &str, _params: &[SqlValue]) -> Result<Vec<Row>, ExecutorError> {
            Ok(self.0.clone())
        }

        async fn execute(&self, sql: &str, _params: &[SqlValue]) -> Result<u64, ExecutorError> {
            if sql.starts_with("BAD") {
                return Err(ExecutorError::new(sql, "syntax error"));
            }
            Ok(1)
        }
    }

    #[tokio::test]
    async fn test_first_takes_leading_row() {
        let exec = Canned(vec![Row::new().with("n", 1_i64), Row::new().with("n", 2_i64)]);
        let row = exec.first("SELECT n", &[]).await.unwrap().unwrap();
        assert_eq!(row.get_i64("n"), Some(1));
    }

    #[tokio::test]
    async fn test_error_carries_statement() {
        let exec = Canned(Vec::new());
        let err = exec.exec("BAD SQL").await.unwrap_err();
        assert_eq!(err.statement, "BAD SQL");
        assert!(err.to_string().contains("syntax error"));
    }

    #[tokio::test]
    async fn test_arc_forwards() {
        let exec = std::sync::Arc::new(Canned(Vec::new()));
        assert_eq!(exec.exec("CREATE TABLE t (x)").await.unwrap(), 1);
        assert!(exec.first("SELECT 1", &[]).await.unwrap().is_none());
    }

    /// Logs statements and reports foreign keys as enforced.
    #[derive(Default)]
    struct Log(std::sync::Mutex<Vec<String>>);

    #[async_trait]
    impl Executor for Log {
        async fn query(&self, sql: &str, _params: &[SqlValue]) -> Result<Vec<Row>, ExecutorError> {
            self.0.lock().unwrap().push(sql.to_string());
            Ok(vec![Row::new().with("foreign_keys", 1_i64)])
        }

        async fn execute(&self, sql: &str, _params: &[SqlValue]) -> Result<u64, ExecutorError> {
            self.0.lock().unwrap().push(sql.to_string());
            if sql.starts_with("BAD") {
                return Err(ExecutorError::new(sql, "syntax error"));
            }
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_isolated_batch_toggles_foreign_keys() {
        let exec = Log::default();
        let statements = vec!["DROP TABLE a".to_string(), "BAD".to_string(), "NEVER".to_string()];
        let err = exec.execute_isolated(&statements).await.unwrap_err();
        assert_eq!(err.applied, 1);
        assert_eq!(err.source.statement, "BAD");
        assert_eq!(
            *exec.0.lock().unwrap(),
            vec![
                "PRAGMA foreign_keys",
                "PRAGMA foreign_keys = OFF",
                "DROP TABLE a",
                "BAD",
                "PRAGMA foreign_keys = ON",
            ]
        );
    }
}
