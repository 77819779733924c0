//! Convention-based relation includes.
//!
//! An include names a related table and attaches its rows to each fetched
//! record. A parent include follows a `<relation>Id` field on the fetched
//! rows to the related table's primary key. A children include finds rows of
//! the related table whose `<thisTable>Id` field points back at the fetched
//! rows. Both key names can be set explicitly.

use std::collections::HashMap;

use serde_json::Value;
use strata_core::{render_qualified, Executor, Schema, Table};
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::filter::check_identifier;
use crate::record::{json_to_sql, row_to_record, Record};

/// Which way a relation points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Pick by naming convention.
    Auto,
    /// Many-to-one: the fetched rows hold the foreign key.
    Parent,
    /// One-to-many: the related rows hold the foreign key.
    Children,
}

/// A relation to attach to fetched rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    relation: String,
    direction: Direction,
    foreign_key: Option<String>,
    local_key: Option<String>,
    alias: Option<String>,
}

impl Include {
    fn new(relation: impl Into<String>, direction: Direction) -> Self {
        Self {
            relation: relation.into(),
            direction,
            foreign_key: None,
            local_key: None,
            alias: None,
        }
    }

    /// Resolves the direction from field names.
    pub fn auto(relation: impl Into<String>) -> Self {
        Self::new(relation, Direction::Auto)
    }

    /// A many-to-one relation.
    pub fn parent(relation: impl Into<String>) -> Self {
        Self::new(relation, Direction::Parent)
    }

    /// A one-to-many relation.
    pub fn children(relation: impl Into<String>) -> Self {
        Self::new(relation, Direction::Children)
    }

    /// Sets the foreign key column (on the fetched rows for a parent, on the
    /// related rows for children).
    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Sets the key the foreign key points at (the related primary key for a
    /// parent, the fetched rows' key for children).
    #[must_use]
    pub fn local_key(mut self, column: impl Into<String>) -> Self {
        self.local_key = Some(column.into());
        self
    }

    /// Sets the field the related rows are attached under.
    #[must_use]
    pub fn alias(mut self, name: impl Into<String>) -> Self {
        self.alias = Some(name.into());
        self
    }

    /// Returns the relation name.
    #[must_use]
    pub fn relation(&self) -> &str {
        &self.relation
    }

    fn attach_as(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.relation)
    }
}

/// A resolved include: which table to read and how rows pair up.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Plan {
    direction: Direction,
    related_table: String,
    /// Column read from the fetched rows.
    source_key: String,
    /// Column matched on the related rows.
    target_key: String,
}

fn singular(name: &str) -> &str {
    name.strip_suffix('s').filter(|s| !s.is_empty()).unwrap_or(name)
}

/// Foreign key names tried for a relation, in order.
pub(crate) fn key_candidates(name: &str) -> Vec<String> {
    let mut out = vec![format!("{name}Id"), format!("{name}_id")];
    let single = singular(name);
    if single != name {
        out.push(format!("{single}Id"));
        out.push(format!("{single}_id"));
    }
    out
}

fn related_table<'s>(schema: Option<&'s Schema>, relation: &str) -> Option<&'s Table> {
    let schema = schema?;
    schema
        .get_table(relation)
        .or_else(|| schema.get_table(&format!("{relation}s")))
}

fn pk_name(table: Option<&Table>) -> String {
    table
        .and_then(Table::primary_key)
        .map_or_else(|| "id".to_string(), |c| c.name.clone())
}

fn resolve(
    include: &Include,
    schema: Option<&Schema>,
    table: &str,
    records: &[Record],
) -> Result<Plan> {
    let unknown = || QueryError::UnknownRelation {
        table: table.to_string(),
        relation: include.relation.clone(),
    };
    let base = schema.and_then(|s| s.get_table(table));
    let related = related_table(schema, &include.relation);
    if schema.is_some() && related.is_none() {
        return Err(QueryError::UnknownTable(include.relation.clone()));
    }
    let related_name = related.map_or_else(|| include.relation.clone(), |t| t.name.clone());

    let has_field = |name: &str| match base {
        Some(t) => t.get_column(name).is_some(),
        None => records.iter().any(|r| r.contains_key(name)),
    };
    let parent_key = include.foreign_key.clone().or_else(|| {
        key_candidates(&include.relation)
            .into_iter()
            .find(|c| has_field(c.as_str()))
    });

    let direction = match include.direction {
        Direction::Auto if parent_key.is_some() => Direction::Parent,
        Direction::Auto => Direction::Children,
        explicit => explicit,
    };

    let plan = match direction {
        Direction::Parent => Plan {
            direction,
            related_table: related_name,
            source_key: parent_key.ok_or_else(unknown)?,
            target_key: include
                .local_key
                .clone()
                .unwrap_or_else(|| pk_name(related)),
        },
        Direction::Children | Direction::Auto => {
            let child_key = match (&include.foreign_key, related) {
                (Some(fk), _) => Some(fk.clone()),
                (None, Some(rel)) => key_candidates(table)
                    .into_iter()
                    .find(|c| rel.get_column(c).is_some()),
                (None, None) => key_candidates(table).into_iter().next(),
            };
            Plan {
                direction: Direction::Children,
                related_table: related_name,
                source_key: include.local_key.clone().unwrap_or_else(|| pk_name(base)),
                target_key: child_key.ok_or_else(unknown)?,
            }
        }
    };

    check_identifier(&plan.related_table)?;
    check_identifier(&plan.source_key)?;
    check_identifier(&plan.target_key)?;
    Ok(plan)
}

fn match_key(value: &Value) -> String {
    value.to_string()
}

/// Loads an include and attaches the related rows to `records`.
pub(crate) async fn attach<E: Executor + ?Sized>(
    executor: &E,
    schema: Option<&Schema>,
    table: &str,
    records: &mut [Record],
    include: &Include,
) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let plan = resolve(include, schema, table, records)?;
    debug!(table, relation = %include.relation, ?plan, "loading include");

    let mut keys: Vec<Value> = Vec::new();
    for record in records.iter() {
        if let Some(v) = record.get(&plan.source_key).filter(|v| !v.is_null()) {
            if !keys.contains(v) {
                keys.push(v.clone());
            }
        }
    }

    let related_rows: Vec<Record> = if keys.is_empty() {
        Vec::new()
    } else {
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT * FROM {} WHERE {} IN ({placeholders})",
            render_qualified(&plan.related_table),
            render_qualified(&plan.target_key)
        );
        let params: Vec<_> = keys.iter().map(|v| json_to_sql(v, None)).collect();
        let definition = related_table(schema, &include.relation);
        executor
            .query(&sql, &params)
            .await?
            .into_iter()
            .map(|row| row_to_record(row, definition))
            .collect()
    };

    let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
    for row in related_rows {
        let key = row.get(&plan.target_key).map(match_key).unwrap_or_default();
        grouped.entry(key).or_default().push(row);
    }

    let field = include.attach_as().to_string();
    for record in records.iter_mut() {
        let key = record.get(&plan.source_key).map(match_key);
        let matches = key.and_then(|k| grouped.get(&k));
        let attached = match plan.direction {
            Direction::Parent => matches
                .and_then(|rows| rows.first())
                .map_or(Value::Null, |r| Value::Object(r.clone())),
            Direction::Children | Direction::Auto => Value::Array(
                matches
                    .map(|rows| rows.iter().cloned().map(Value::Object).collect())
                    .unwrap_or_default(),
            ),
        };
        record.insert(field.clone(), attached);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::Column;

    fn schema() -> Schema {
        Schema::new("blog")
            .table(
                Table::new("users")
                    .column(Column::integer("id").primary_key())
                    .column(Column::text("name")),
            )
            .table(
                Table::new("posts")
                    .column(Column::integer("id").primary_key())
                    .column(Column::integer("userId"))
                    .column(Column::text("title")),
            )
    }

    #[test]
    fn test_candidates() {
        assert_eq!(
            key_candidates("users"),
            vec!["usersId", "users_id", "userId", "user_id"]
        );
        assert_eq!(key_candidates("user"), vec!["userId", "user_id"]);
    }

    #[test]
    fn test_auto_resolves_parent() {
        let s = schema();
        let plan = resolve(&Include::auto("user"), Some(&s), "posts", &[]).unwrap();
        assert_eq!(plan.direction, Direction::Parent);
        assert_eq!(plan.related_table, "users");
        assert_eq!(plan.source_key, "userId");
        assert_eq!(plan.target_key, "id");
    }

    #[test]
    fn test_auto_resolves_children() {
        let s = schema();
        let plan = resolve(&Include::auto("posts"), Some(&s), "users", &[]).unwrap();
        assert_eq!(plan.direction, Direction::Children);
        assert_eq!(plan.related_table, "posts");
        assert_eq!(plan.source_key, "id");
        assert_eq!(plan.target_key, "userId");
    }

    #[test]
    fn test_overrides_win() {
        let s = schema();
        let include = Include::children("posts")
            .foreign_key("title")
            .local_key("name");
        let plan = resolve(&include, Some(&s), "users", &[]).unwrap();
        assert_eq!(plan.source_key, "name");
        assert_eq!(plan.target_key, "title");
    }

    #[test]
    fn test_unresolvable_relations() {
        let s = schema();
        assert!(matches!(
            resolve(&Include::auto("comments"), Some(&s), "posts", &[]),
            Err(QueryError::UnknownTable(_))
        ));
        assert!(matches!(
            resolve(&Include::parent("posts"), Some(&s), "users", &[]),
            Err(QueryError::UnknownRelation { .. })
        ));
    }

    #[test]
    fn test_without_schema_uses_record_fields() {
        let records = vec![json!({"id": 1, "authorId": 2}).as_object().unwrap().clone()];
        let plan = resolve(&Include::auto("author"), None, "posts", &records).unwrap();
        assert_eq!(plan.direction, Direction::Parent);
        assert_eq!(plan.related_table, "author");
        assert_eq!(plan.source_key, "authorId");
    }
}
