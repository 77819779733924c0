//! Live schema introspection.
//!
//! Reads the catalog of a SQLite-compatible database and rebuilds the
//! subset of a target [`Schema`] that currently exists. Only tables named by
//! the target are inspected; everything else in the database is ignored.

use std::collections::HashSet;

use strata_core::{
    infer_type, Column, Executor, ForeignKey, ForeignKeyAction, Index, Schema, SqlValue, Table,
};
use tracing::debug;

use crate::defaults::parse_default;
use crate::dialect::RECREATE_PREFIX;
use crate::error::Result;

const LIST_TABLES_SQL: &str =
    "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'";

const TABLE_INFO_SQL: &str =
    "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid";

const FOREIGN_KEYS_SQL: &str =
    "SELECT id, \"table\", \"from\", \"to\", on_delete FROM pragma_foreign_key_list(?) ORDER BY id, seq";

const INDEX_LIST_SQL: &str =
    "SELECT name, \"unique\", origin FROM pragma_index_list(?) ORDER BY name";

const INDEX_INFO_SQL: &str = "SELECT name FROM pragma_index_info(?) ORDER BY seqno";

/// Reconstructs the live structure of every target table that exists.
///
/// The returned schema carries the target's name and version so that it
/// can be diffed directly against the target.
pub async fn introspect<E: Executor + ?Sized>(executor: &E, target: &Schema) -> Result<Schema> {
    let wanted: HashSet<&str> = target.table_names().collect();

    let mut existing = Vec::new();
    for row in executor.query(LIST_TABLES_SQL, &[]).await? {
        let Some(name) = row.get_str("name") else {
            continue;
        };
        if wanted.contains(name) && !name.starts_with(RECREATE_PREFIX) {
            let ddl = row.get_str("sql").unwrap_or_default().to_string();
            existing.push((name.to_string(), ddl));
        }
    }

    let mut schema = Schema {
        name: target.name.clone(),
        version: target.version,
        tables: Vec::with_capacity(existing.len()),
    };

    // Keep the target's table order so plans are stable.
    for target_table in &target.tables {
        if let Some((name, ddl)) = existing.iter().find(|(n, _)| *n == target_table.name) {
            schema.tables.push(introspect_table(executor, name, ddl).await?);
        }
    }

    debug!(
        schema = %target.name,
        found = schema.tables.len(),
        wanted = target.tables.len(),
        "introspected live schema"
    );
    Ok(schema)
}

/// Reads the columns, foreign keys and indexes of a single table.
pub async fn introspect_table<E: Executor + ?Sized>(
    executor: &E,
    name: &str,
    ddl: &str,
) -> Result<Table> {
    let param = [SqlValue::Text(name.to_string())];
    let mut table = Table::new(name);

    for row in executor.query(TABLE_INFO_SQL, &param).await? {
        let Some(col_name) = row.get_str("name") else {
            continue;
        };
        let (column_type, mode) = infer_type(row.get_str("type").unwrap_or_default());
        let mut column = Column::new(col_name, column_type);
        column.mode = mode;
        column.not_null = row.get_i64("notnull").unwrap_or(0) != 0;
        column.primary_key = row.get_i64("pk").unwrap_or(0) > 0;
        if column.primary_key {
            column.not_null = true;
        }
        column.default = row.get_str("dflt_value").map(parse_default);
        table.columns.push(column);
    }

    if ddl.to_ascii_uppercase().contains("AUTOINCREMENT") {
        let pks: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        if let [only] = pks.as_slice() {
            table.columns[*only].auto_increment = true;
        }
    }

    read_foreign_keys(executor, &mut table).await?;
    read_indexes(executor, &mut table).await?;

    Ok(table)
}

async fn read_foreign_keys<E: Executor + ?Sized>(executor: &E, table: &mut Table) -> Result<()> {
    let param = [SqlValue::Text(table.name.clone())];
    let rows = executor.query(FOREIGN_KEYS_SQL, &param).await?;

    let mut seen = HashSet::new();
    for row in rows {
        let id = row.get_i64("id").unwrap_or(0);
        // Composite foreign keys cannot be expressed per column; keep the
        // first column of each.
        if !seen.insert(id) {
            continue;
        }
        let (Some(parent), Some(from)) = (row.get_str("table"), row.get_str("from")) else {
            continue;
        };
        let to = match row.get_str("to") {
            Some(to) => to.to_string(),
            None => parent_primary_key(executor, parent).await?.unwrap_or_default(),
        };
        let on_delete = row
            .get_str("on_delete")
            .map(ForeignKeyAction::from_sql)
            .filter(|a| *a != ForeignKeyAction::NoAction);

        if let Some(column) = table.columns.iter_mut().find(|c| c.name == from) {
            column.references = Some(ForeignKey {
                table: parent.to_string(),
                column: to,
                on_delete,
            });
        }
    }
    Ok(())
}

/// Resolves the implicit target of `REFERENCES parent` without a column.
async fn parent_primary_key<E: Executor + ?Sized>(
    executor: &E,
    parent: &str,
) -> Result<Option<String>> {
    let param = [SqlValue::Text(parent.to_string())];
    let rows = executor.query(TABLE_INFO_SQL, &param).await?;
    Ok(rows
        .iter()
        .filter(|r| r.get_i64("pk").unwrap_or(0) > 0)
        .min_by_key(|r| r.get_i64("pk").unwrap_or(0))
        .and_then(|r| r.get_str("name"))
        .map(str::to_string))
}

async fn read_indexes<E: Executor + ?Sized>(executor: &E, table: &mut Table) -> Result<()> {
    let param = [SqlValue::Text(table.name.clone())];
    let indexes = executor.query(INDEX_LIST_SQL, &param).await?;

    for row in indexes {
        let Some(name) = row.get_str("name") else {
            continue;
        };
        let origin = row.get_str("origin").unwrap_or("c");
        let unique = row.get_i64("unique").unwrap_or(0) != 0;

        let info = executor
            .query(INDEX_INFO_SQL, &[SqlValue::Text(name.to_string())])
            .await?;
        let columns: Vec<String> = info
            .iter()
            .filter_map(|r| r.get_str("name"))
            .map(str::to_string)
            .collect();

        match origin {
            "c" => table.indexes.push(Index {
                name: name.to_string(),
                columns,
                unique,
            }),
            "u" => {
                if let [only] = columns.as_slice() {
                    if let Some(column) = table.columns.iter_mut().find(|c| c.name == *only) {
                        column.unique = true;
                    }
                }
            }
            // Primary key indexes are already reflected on the columns.
            _ => {}
        }
    }
    Ok(())
}
