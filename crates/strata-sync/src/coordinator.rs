//! Synchronization coordinator.
//!
//! Runs synchronization passes and remembers their outcome per database
//! identity. Concurrent requests for the same identity share one pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use strata_core::{BatchError, Executor, Schema};
use tracing::{debug, info, warn};

use crate::diff::{diff, SyncPlan, SyncResult};
use crate::error::{Result, SyncError};
use crate::hash::schema_hash;
use crate::introspect::introspect;
use crate::state::StateStore;

type SharedPass = Shared<BoxFuture<'static, Result<SyncResult>>>;

#[derive(Default)]
struct Inner {
    /// Last hash known to be applied, per database identity.
    cache: Mutex<HashMap<String, String>>,
    /// Running pass and the hash it applies, per database identity.
    in_flight: Mutex<HashMap<String, (String, SharedPass)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps databases in step with their target schemas.
///
/// Cloning is cheap and clones share the cache. Independent coordinators
/// never see each other's state.
#[derive(Clone, Default)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("cached", &lock(&self.inner.cache).len())
            .field("in_flight", &lock(&self.inner.in_flight).len())
            .finish()
    }
}

impl SyncCoordinator {
    /// Creates a coordinator with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings the database identified by `db` in line with `schema`.
    ///
    /// Returns immediately when the same schema hash was already applied
    /// through this coordinator. If a pass for `db` is running, waits for
    /// it: its result is returned when it applies the same hash, otherwise
    /// a new pass starts once it finishes.
    pub async fn synchronize<E>(
        &self,
        executor: Arc<E>,
        schema: &Schema,
        db: &str,
    ) -> Result<SyncResult>
    where
        E: Executor + 'static,
    {
        let hash = schema_hash(schema)?;

        loop {
            if self.cached_hash(db).as_deref() == Some(hash.as_str()) {
                debug!(db, schema = %schema.name, hash = %hash, "schema hash cached, nothing to do");
                return Ok(SyncResult::unchanged(hash, Vec::new()));
            }

            let (pass, ours) = {
                let mut in_flight = lock(&self.inner.in_flight);
                if let Some((running, pass)) = in_flight.get(db) {
                    (pass.clone(), *running == hash)
                } else {
                    let pass = self.start_pass(Arc::clone(&executor), schema.clone(), db, &hash);
                    in_flight.insert(db.to_string(), (hash.clone(), pass.clone()));
                    (pass, true)
                }
            };

            if ours {
                return pass.await;
            }
            debug!(db, "waiting for a pass with a different schema");
            // Its outcome belongs to its own callers.
            let _ = pass.await;
        }
    }

    /// Returns the hash last applied to `db` through this coordinator.
    #[must_use]
    pub fn cached_hash(&self, db: &str) -> Option<String> {
        lock(&self.inner.cache).get(db).cloned()
    }

    /// Drops the cached hash of `db`, forcing the next call to consult the
    /// database again.
    pub fn forget(&self, db: &str) {
        lock(&self.inner.cache).remove(db);
    }

    fn start_pass<E>(&self, executor: Arc<E>, schema: Schema, db: &str, hash: &str) -> SharedPass
    where
        E: Executor + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let db = db.to_string();
        let hash = hash.to_string();

        async move {
            info!(db = %db, schema = %schema.name, hash = %hash, "synchronizing schema");
            let result = run_pass(executor.as_ref(), &schema, &hash).await;

            if result.is_ok() {
                lock(&inner.cache).insert(db.clone(), hash);
            }
            lock(&inner.in_flight).remove(&db);
            result
        }
        .boxed()
        .shared()
    }
}

/// Introspects and diffs without executing anything.
pub async fn plan<E: Executor + ?Sized>(executor: &E, schema: &Schema) -> Result<SyncPlan> {
    let current = introspect(executor, schema).await?;
    diff(&current, schema)
}

async fn run_pass<E: Executor + ?Sized>(
    executor: &E,
    schema: &Schema,
    hash: &str,
) -> Result<SyncResult> {
    let store = StateStore::new(executor);
    store.ensure_table().await?;

    if let Some(state) = store.load(&schema.name).await? {
        if state.schema_hash == hash {
            debug!(schema = %schema.name, hash, "persisted hash matches");
            return Ok(SyncResult::unchanged(hash.to_string(), Vec::new()));
        }
    }

    let plan = plan(executor, schema).await?;
    for warning in &plan.warnings {
        warn!(schema = %schema.name, "{warning}");
    }

    if plan.is_empty() {
        store.store(&schema.name, hash, schema.version).await?;
        info!(schema = %schema.name, "schema already up to date");
        return Ok(SyncResult::unchanged(hash.to_string(), plan.warnings));
    }

    let SyncPlan {
        statements,
        warnings,
        batches,
    } = plan;
    let mut applied = Vec::with_capacity(statements.len());
    let mut index = 0;
    while index < statements.len() {
        if let Some(batch) = batches.iter().find(|b| b.start == index && !b.is_empty()) {
            let group = &statements[batch.clone()];
            debug!(statements = group.len(), "applying isolated batch");
            if let Err(BatchError {
                applied: done,
                source,
            }) = executor.execute_isolated(group).await
            {
                applied.extend_from_slice(&group[..done.min(group.len())]);
                return Err(SyncError::Execution { source, applied });
            }
            applied.extend_from_slice(group);
            index = batch.end;
            continue;
        }

        let statement = &statements[index];
        debug!(sql = %statement, "applying");
        if let Err(source) = executor.exec(statement).await {
            return Err(SyncError::Execution { source, applied });
        }
        applied.push(statement.clone());
        index += 1;
    }

    store.store(&schema.name, hash, schema.version).await?;
    info!(
        schema = %schema.name,
        statements = applied.len(),
        "schema synchronized"
    );

    Ok(SyncResult {
        changed: true,
        applied_statements: applied,
        warnings,
        hash: hash.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Column, Table};
    use strata_sqlite::SqliteExecutor;

    fn schema() -> Schema {
        Schema::new("app").table(
            Table::new("notes")
                .column(Column::integer("id").primary_key())
                .column(Column::text("body").not_null()),
        )
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let exec = Arc::new(SqliteExecutor::memory().await.unwrap());
        let coordinator = SyncCoordinator::new();

        let first = coordinator
            .synchronize(Arc::clone(&exec), &schema(), "main")
            .await
            .unwrap();
        assert!(first.changed);
        assert_eq!(coordinator.cached_hash("main"), Some(first.hash.clone()));

        let second = coordinator
            .synchronize(Arc::clone(&exec), &schema(), "main")
            .await
            .unwrap();
        assert!(!second.changed);
        assert!(second.applied_statements.is_empty());
        assert_eq!(second.hash, first.hash);
    }

    #[tokio::test]
    async fn test_persisted_hash_short_circuits() {
        let exec = Arc::new(SqliteExecutor::memory().await.unwrap());

        SyncCoordinator::new()
            .synchronize(Arc::clone(&exec), &schema(), "main")
            .await
            .unwrap();

        // A fresh coordinator has no cache but finds the stored hash.
        let fresh = SyncCoordinator::new();
        let result = fresh
            .synchronize(Arc::clone(&exec), &schema(), "main")
            .await
            .unwrap();
        assert!(!result.changed);
        assert!(fresh.cached_hash("main").is_some());
    }

    #[tokio::test]
    async fn test_forget_evicts() {
        let exec = Arc::new(SqliteExecutor::memory().await.unwrap());
        let coordinator = SyncCoordinator::new();
        coordinator
            .synchronize(Arc::clone(&exec), &schema(), "main")
            .await
            .unwrap();

        coordinator.forget("main");
        assert!(coordinator.cached_hash("main").is_none());
    }

    #[tokio::test]
    async fn test_failed_statement_reports_applied() {
        let exec = Arc::new(SqliteExecutor::memory().await.unwrap());
        exec.exec("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL, tag TEXT)")
            .await
            .unwrap();
        exec.exec("CREATE INDEX idx_tag ON notes (tag)").await.unwrap();
        exec.exec("CREATE VIEW tagged AS SELECT tag FROM notes").await.unwrap();

        // Dropping `tag` breaks the view, so the DROP COLUMN fails after the
        // index drop went through.
        let err = SyncCoordinator::new()
            .synchronize(Arc::clone(&exec), &schema(), "main")
            .await
            .unwrap_err();
        match err {
            SyncError::Execution { source, applied } => {
                assert_eq!(applied, vec!["DROP INDEX IF EXISTS \"idx_tag\""]);
                assert!(source.statement.contains("DROP COLUMN"));
            }
            other => panic!("expected Execution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plan_is_dry_run() {
        let exec = SqliteExecutor::memory().await.unwrap();
        let plan = plan(&exec, &schema()).await.unwrap();
        assert_eq!(plan.statements.len(), 1);

        let again = super::plan(&exec, &schema()).await.unwrap();
        assert_eq!(again, plan);
    }
}
