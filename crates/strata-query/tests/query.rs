//! Query builder and table clients against in-memory SQLite.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use strata_core::{Column, Executor, ExecutorError, Row, Schema, SqlValue, Table};
use strata_query::{Database, Filter, Include, QueryError, Record};
use strata_sqlite::SqliteExecutor;
use strata_sync::SyncCoordinator;

fn schema() -> Schema {
    Schema::new("blog")
        .table(
            Table::new("users")
                .column(Column::integer("id").primary_key().auto_increment())
                .column(Column::text("name").not_null())
                .column(Column::boolean("active").not_null().default_value(true)),
        )
        .table(
            Table::new("posts")
                .column(Column::integer("id").primary_key().auto_increment())
                .column(Column::integer("userId").references("users", "id"))
                .column(Column::text("title").not_null())
                .column(Column::json("meta"))
                .column(Column::integer("score").not_null().default_value(0)),
        )
}

fn rec(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

async fn setup() -> (Arc<SqliteExecutor>, Database<SqliteExecutor>) {
    let exec = Arc::new(SqliteExecutor::memory().await.unwrap());
    SyncCoordinator::new()
        .synchronize(Arc::clone(&exec), &schema(), "query-tests")
        .await
        .unwrap();
    let db = Database::new(Arc::clone(&exec), schema());
    (exec, db)
}

async fn seed(db: &Database<SqliteExecutor>) {
    let users = db.table("users").unwrap();
    users
        .insert(&[
            rec(json!({"name": "ada"})),
            rec(json!({"name": "brian"})),
            rec(json!({"name": "chris", "active": false})),
        ])
        .await
        .unwrap();

    let posts = db.table("posts").unwrap();
    posts
        .insert(&[
            rec(json!({"userId": 1, "title": "first", "meta": {"a": 1}})),
            rec(json!({"userId": 1, "title": "second", "score": 7})),
            rec(json!({"userId": 2, "title": "third", "meta": ["x", "y"]})),
        ])
        .await
        .unwrap();
}

/// Counts every statement while delegating to SQLite.
struct Recording {
    inner: SqliteExecutor,
    calls: AtomicUsize,
}

#[async_trait]
impl Executor for Recording {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(sql, params).await
    }
}

#[tokio::test]
async fn test_delete_without_filter_sends_nothing() {
    let exec = Arc::new(Recording {
        inner: SqliteExecutor::memory().await.unwrap(),
        calls: AtomicUsize::new(0),
    });
    let db = Database::new(Arc::clone(&exec), schema());

    let err = db.table("posts").unwrap().query().delete().await.unwrap_err();
    assert!(matches!(err, QueryError::UnfilteredDelete { ref table } if table == "posts"));
    assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_json_columns_are_transparent() {
    let (exec, db) = setup().await;
    seed(&db).await;
    let posts = db.table("posts").unwrap();

    let stored = exec
        .first("SELECT meta FROM posts WHERE title = ?", &[SqlValue::Text("first".into())])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_str("meta"), Some(r#"{"a":1}"#));

    let first = posts
        .filter(Filter::new().value("title", "first"))
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first["meta"], json!({"a": 1}));

    let all = posts.query().order_by("id").many().await.unwrap();
    assert_eq!(all[2]["meta"], json!(["x", "y"]));
    assert_eq!(all[1]["meta"], Value::Null);
}

#[tokio::test]
async fn test_insert_returns_stored_row_and_drops_unknown_fields() {
    let (_exec, db) = setup().await;
    let users = db.table("users").unwrap();

    let stored = users
        .insert_one(&rec(json!({"name": "dora", "nickname": "d"})))
        .await
        .unwrap();
    assert_eq!(stored["id"], json!(1));
    assert_eq!(stored["active"], json!(true));
    assert!(!stored.contains_key("nickname"));
}

#[tokio::test]
async fn test_one_distinguishes_missing_and_ambiguous() {
    let (_exec, db) = setup().await;
    seed(&db).await;
    let users = db.table("users").unwrap();

    let ada = users
        .filter(Filter::new().value("name", "ada"))
        .one()
        .await
        .unwrap();
    assert_eq!(ada["id"], json!(1));

    let missing = users
        .filter(Filter::new().value("name", "zed"))
        .one()
        .await
        .unwrap_err();
    assert!(matches!(missing, QueryError::NotFound { .. }));

    let many = users.query().one().await.unwrap_err();
    assert!(matches!(many, QueryError::NotUnique { count: 3, .. }));
}

#[tokio::test]
async fn test_counts_exists_and_distinct() {
    let (_exec, db) = setup().await;
    seed(&db).await;
    let users = db.table("users").unwrap();
    let posts = db.table("posts").unwrap();

    assert_eq!(
        users.filter(Filter::new().value("active", true)).count().await.unwrap(),
        2
    );
    assert!(users.filter(Filter::new().value("name", "%ri%")).exists().await.unwrap());
    assert!(!users.filter(Filter::new().value("name", "zed")).exists().await.unwrap());

    let authors = posts.query().order_by("userId").distinct("userId").await.unwrap();
    assert_eq!(authors, vec![json!(1), json!(2)]);

    let flags = users.query().order_by("-active").distinct("active").await.unwrap();
    assert_eq!(flags, vec![json!(true), json!(false)]);
}

#[tokio::test]
async fn test_json_filters_and_any_groups() {
    let (_exec, db) = setup().await;
    seed(&db).await;
    let posts = db.table("posts").unwrap();

    let picked = posts
        .query()
        .filter_json(&json!({"title": {"in": ["first", "third"]}}))
        .unwrap()
        .order_by("id")
        .many()
        .await
        .unwrap();
    let titles: Vec<_> = picked.iter().map(|r| r["title"].clone()).collect();
    assert_eq!(titles, vec![json!("first"), json!("third")]);

    let either = posts
        .query()
        .filter_any([
            Filter::new().gt("score", 5),
            Filter::new().value("userId", 2),
        ])
        .count()
        .await
        .unwrap();
    assert_eq!(either, 2);

    let raw = posts
        .query()
        .raw("length(title) = ?", vec![SqlValue::Int(5)])
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(raw, 2);
}

#[tokio::test]
async fn test_paging() {
    let (_exec, db) = setup().await;
    let users = db.table("users").unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        users.insert_one(&rec(json!({"name": name}))).await.unwrap();
    }

    let page = users.query().order_by("id").limit(2).offset(2).many().await.unwrap();
    let ids: Vec<_> = page.iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, vec![json!(3), json!(4)]);

    let rest = users.query().order_by("id").offset(4).many().await.unwrap();
    assert_eq!(rest.len(), 1);
}

#[tokio::test]
async fn test_includes() {
    let (_exec, db) = setup().await;
    seed(&db).await;

    let posts = db
        .table("posts")
        .unwrap()
        .query()
        .order_by("id")
        .include(Include::auto("user"))
        .many()
        .await
        .unwrap();
    assert_eq!(posts[0]["user"]["name"], json!("ada"));
    assert_eq!(posts[2]["user"]["name"], json!("brian"));

    let users = db
        .table("users")
        .unwrap()
        .query()
        .order_by("id")
        .include(Include::auto("posts").alias("writing"))
        .many()
        .await
        .unwrap();
    assert_eq!(users[0]["writing"].as_array().unwrap().len(), 2);
    assert_eq!(users[1]["writing"][0]["meta"], json!(["x", "y"]));
    assert_eq!(users[2]["writing"], json!([]));

    let err = db
        .table("users")
        .unwrap()
        .query()
        .include(Include::auto("comments"))
        .many()
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::UnknownTable(_)));
}

#[tokio::test]
async fn test_updates_and_deletes() {
    let (_exec, db) = setup().await;
    seed(&db).await;
    let posts = db.table("posts").unwrap();

    let changed = posts
        .filter(Filter::new().value("userId", 1))
        .order_by("-id")
        .update(&rec(json!({"score": 42, "meta": {"edited": true}})))
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let second = posts.find(2).await.unwrap().unwrap();
    assert_eq!(second["score"], json!(42));
    assert_eq!(second["meta"], json!({"edited": true}));

    let bulk = posts
        .filter(Filter::new().value("userId", 1))
        .update_many(&rec(json!({"score": 1})))
        .await
        .unwrap();
    assert_eq!(bulk, 2);
    assert!(matches!(
        posts.query().update_many(&rec(json!({"score": 0}))).await,
        Err(QueryError::Validation(_))
    ));
    assert!(matches!(
        posts.query().order_by("-id").update(&rec(json!({"score": 0}))).await,
        Err(QueryError::Validation(_))
    ));

    let removed = posts
        .filter(Filter::new().value("title", "third"))
        .delete()
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(posts.delete_all().await.unwrap(), 2);
    assert_eq!(posts.query().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_table() {
    let (_exec, db) = setup().await;
    assert!(matches!(db.table("nope"), Err(QueryError::UnknownTable(_))));
    let names: Vec<_> = db.tables().map(|t| t.name().to_string()).collect();
    assert_eq!(names, vec!["posts", "users"]);
}

#[tokio::test]
async fn test_keyword_named_tables_and_columns() {
    let schema = Schema::new("keywords")
        .table(
            Table::new("group")
                .column(Column::integer("id").primary_key().auto_increment())
                .column(Column::text("order").not_null()),
        )
        .table(
            Table::new("order")
                .column(Column::integer("id").primary_key().auto_increment())
                .column(Column::integer("groupId").references("group", "id"))
                .column(Column::text("group").not_null()),
        );
    let exec = Arc::new(SqliteExecutor::memory().await.unwrap());
    SyncCoordinator::new()
        .synchronize(Arc::clone(&exec), &schema, "keywords")
        .await
        .unwrap();
    let db = Database::new(Arc::clone(&exec), schema);

    let groups = db.table("group").unwrap();
    groups.insert_one(&rec(json!({"order": "first"}))).await.unwrap();
    let orders = db.table("order").unwrap();
    orders
        .insert(&[
            rec(json!({"groupId": 1, "group": "a"})),
            rec(json!({"groupId": 1, "group": "b"})),
        ])
        .await
        .unwrap();

    let picked = orders
        .filter(Filter::new().value("group", "b"))
        .order_by("-group")
        .include(Include::auto("group").alias("parent"))
        .many()
        .await
        .unwrap();
    assert_eq!(picked.len(), 1);
    assert_eq!(picked[0]["parent"]["order"], json!("first"));

    let with_orders = groups
        .query()
        .include(Include::auto("order").alias("orders"))
        .many()
        .await
        .unwrap();
    assert_eq!(with_orders[0]["order"], json!("first"));
    assert_eq!(with_orders[0]["orders"].as_array().unwrap().len(), 2);

    assert_eq!(
        orders.query().order_by("group").distinct("group").await.unwrap(),
        vec![json!("a"), json!("b")]
    );
    let changed = orders
        .filter(Filter::new().value("group", "a"))
        .update(&rec(json!({"group": "c"})))
        .await
        .unwrap();
    assert_eq!(changed, 1);
    assert_eq!(
        orders.filter(Filter::new().value("group", "c")).count().await.unwrap(),
        1
    );
    assert_eq!(
        orders.filter(Filter::new().value("group", "c")).delete().await.unwrap(),
        1
    );
    assert_eq!(orders.delete_all().await.unwrap(), 1);
}
