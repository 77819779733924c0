//! Schema diffing.
//!
//! Compares the live schema with the target and produces the ordered DDL
//! that brings one to the other. Every planning error of a pass is
//! collected before returning, and nothing is executed here.

use std::collections::HashMap;
use std::ops::Range;

use serde::Serialize;
use strata_core::{storage_compatible, Column, DefaultValue, Index, Schema, Table};

use crate::defaults::{is_non_constant_default, normalize_declared};
use crate::dialect::SqliteDialect;
use crate::error::{Result, SyncError};

/// Ordered DDL plus the warnings attached to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    /// Statements to run, in order.
    pub statements: Vec<String>,
    /// Destructive or notable changes.
    pub warnings: Vec<String>,
    /// Ranges of `statements` that must run as one isolated batch, with
    /// foreign keys unenforced.
    #[serde(skip)]
    pub batches: Vec<Range<usize>>,
}

impl SyncPlan {
    /// Returns `true` if there is nothing to execute.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Outcome of one synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// Whether any statement was executed.
    pub changed: bool,
    /// Statements executed, in order.
    pub applied_statements: Vec<String>,
    /// Warnings produced while planning.
    pub warnings: Vec<String>,
    /// Content hash of the target schema.
    pub hash: String,
}

impl SyncResult {
    /// A result for a pass that executed nothing.
    #[must_use]
    pub const fn unchanged(hash: String, warnings: Vec<String>) -> Self {
        Self {
            changed: false,
            applied_statements: Vec::new(),
            warnings,
            hash,
        }
    }
}

/// Computes the plan that turns `current` into `target`.
///
/// `current` must only contain tables that exist in the database; target
/// tables missing from it are created.
pub fn diff(current: &Schema, target: &Schema) -> Result<SyncPlan> {
    let dialect = SqliteDialect::new();
    let mut plan = SyncPlan::default();
    let mut errors = Vec::new();

    for table in &target.tables {
        match current.get_table(&table.name) {
            None => {
                plan.statements.push(dialect.create_table_sql(table));
                plan.statements.extend(
                    table
                        .indexes
                        .iter()
                        .map(|i| dialect.create_index_sql(&table.name, i)),
                );
            }
            Some(live) => diff_table(&dialect, live, table, &mut plan, &mut errors),
        }
    }

    match SyncError::from_many(errors) {
        Some(err) => Err(err),
        None => Ok(plan),
    }
}

fn diff_table(
    dialect: &SqliteDialect,
    current: &Table,
    target: &Table,
    plan: &mut SyncPlan,
    errors: &mut Vec<SyncError>,
) {
    let error_count = errors.len();

    let mut added = Vec::new();
    for column in &target.columns {
        if current.get_column(&column.name).is_some() {
            continue;
        }
        match unsafe_addition_reason(column) {
            Some(reason) => errors.push(SyncError::UnsafeColumnAddition {
                table: target.name.clone(),
                column: column.name.clone(),
                reason: reason.to_string(),
            }),
            None => added.push(column),
        }
    }
    if errors.len() > error_count {
        return;
    }

    let triggers: Vec<&str> = added
        .iter()
        .filter(|c| matches!(&c.default, Some(DefaultValue::Raw(expr)) if is_non_constant_default(expr)))
        .map(|c| c.name.as_str())
        .collect();
    if !triggers.is_empty() {
        let start = plan.statements.len();
        plan.statements
            .extend(dialect.recreate_table_sql(current, target));
        plan.batches.push(start..plan.statements.len());
        plan.warnings.push(format!(
            "table \"{}\" recreated to add column(s) with non-constant defaults: {}",
            target.name,
            triggers.join(", ")
        ));
        for column in &current.columns {
            if target.get_column(&column.name).is_none() {
                plan.warnings.push(format!(
                    "column \"{}\".\"{}\" is not part of the recreated table; its data is discarded",
                    target.name, column.name
                ));
            }
        }
        for index in &current.indexes {
            if target.get_index(&index.name).is_none() {
                plan.warnings.push(format!(
                    "index \"{}\" on \"{}\" is not part of the recreated table and is dropped",
                    index.name, target.name
                ));
            }
        }
        return;
    }

    for column in &target.columns {
        if let Some(live) = current.get_column(&column.name) {
            if let Some(detail) = incompatibility(column, live) {
                errors.push(SyncError::IncompatibleColumn {
                    table: target.name.clone(),
                    column: column.name.clone(),
                    detail,
                });
            }
        }
    }
    if errors.len() > error_count {
        return;
    }

    let live_indexes: HashMap<&str, &Index> = current
        .indexes
        .iter()
        .map(|i| (i.name.as_str(), i))
        .collect();
    let mut drop_indexes = Vec::new();
    let mut create_indexes = Vec::new();

    for index in &target.indexes {
        match live_indexes.get(index.name.as_str()) {
            Some(live) if same_index(live, index) => {}
            Some(_) => {
                plan.warnings.push(format!(
                    "index \"{}\" on \"{}\" changed and is rebuilt",
                    index.name, target.name
                ));
                drop_indexes.push(dialect.drop_index_sql(&index.name));
                create_indexes.push(dialect.create_index_sql(&target.name, index));
            }
            None => create_indexes.push(dialect.create_index_sql(&target.name, index)),
        }
    }
    for index in &current.indexes {
        if target.get_index(&index.name).is_none() {
            plan.warnings.push(format!(
                "index \"{}\" on \"{}\" is not in the schema and is dropped",
                index.name, target.name
            ));
            drop_indexes.push(dialect.drop_index_sql(&index.name));
        }
    }

    // Indexes go first: SQLite refuses to drop an indexed column.
    plan.statements.extend(drop_indexes);
    plan.statements.extend(
        added
            .iter()
            .map(|c| dialect.add_column_sql(&target.name, c)),
    );
    for column in &current.columns {
        if target.get_column(&column.name).is_none() {
            plan.warnings.push(format!(
                "column \"{}\".\"{}\" is dropped; its data is lost",
                target.name, column.name
            ));
            plan.statements
                .push(dialect.drop_column_sql(&target.name, &column.name));
        }
    }
    plan.statements.extend(create_indexes);
}

/// Returns why a column cannot be added to an existing table, if it can't.
fn unsafe_addition_reason(column: &Column) -> Option<&'static str> {
    if column.primary_key {
        Some("primary key columns must exist when the table is created")
    } else if column.unique {
        Some("unique columns cannot be backfilled")
    } else if column.references.is_some() {
        Some("foreign key columns must exist when the table is created")
    } else if column.enum_values.is_some() {
        Some("enum CHECK constraints must exist when the table is created")
    } else if column.not_null && normalize_declared(column.default.as_ref()).is_none() {
        Some("NOT NULL columns need a default")
    } else {
        None
    }
}

/// Compares a target column with its live counterpart.
///
/// Two asymmetries are tolerated so that databases created before the
/// schema gained a mode or a default keep working: a live column without a
/// mode, and a live column without a default.
fn incompatibility(target: &Column, live: &Column) -> Option<String> {
    if !storage_compatible(target.column_type, live.column_type) {
        return Some(format!(
            "type: expected {:?}, found {:?}",
            target.column_type, live.column_type
        ));
    }

    if target.mode != live.mode && live.mode.is_some() {
        return Some(format!(
            "mode: expected {:?}, found {:?}",
            target.mode, live.mode
        ));
    }

    let target_not_null = target.not_null || target.primary_key;
    let live_not_null = live.not_null || live.primary_key;
    if target_not_null != live_not_null {
        return Some(format!(
            "notNull: expected {target_not_null}, found {live_not_null}"
        ));
    }

    if target.primary_key != live.primary_key {
        return Some(format!(
            "primaryKey: expected {}, found {}",
            target.primary_key, live.primary_key
        ));
    }

    let target_default = normalize_declared(target.default.as_ref());
    let live_default = normalize_declared(live.default.as_ref());
    if live_default.is_some() && target_default != live_default {
        return Some(format!(
            "default: expected {}, found {}",
            target_default.as_deref().unwrap_or("none"),
            live_default.as_deref().unwrap_or("none")
        ));
    }

    let target_fk = target.references.as_ref().map(|f| (&f.table, &f.column));
    let live_fk = live.references.as_ref().map(|f| (&f.table, &f.column));
    if target_fk != live_fk {
        let show = |fk: Option<(&String, &String)>| {
            fk.map_or_else(|| "none".to_string(), |(t, c)| format!("{t}({c})"))
        };
        return Some(format!(
            "references: expected {}, found {}",
            show(target_fk),
            show(live_fk)
        ));
    }

    None
}

fn same_index(a: &Index, b: &Index) -> bool {
    a.unique == b.unique && a.columns == b.columns
}
