//! Mapping between canonical column types and declared SQL types.

use crate::schema::{Column, ColumnMode, ColumnType};

/// Returns the declared SQL type used in DDL for a column.
///
/// Modes get their own spelling so they survive a round trip through the
/// catalog: `TIMESTAMP` and `BOOLEAN` both carry integer affinity.
#[must_use]
pub const fn declared_type(column_type: ColumnType, mode: Option<ColumnMode>) -> &'static str {
    match (column_type, mode) {
        (ColumnType::Integer, Some(ColumnMode::TimestampMs)) => "TIMESTAMP",
        (ColumnType::Integer, Some(ColumnMode::Boolean)) => "BOOLEAN",
        (ColumnType::Integer, None) => "INTEGER",
        (ColumnType::Text | ColumnType::Json, _) => "TEXT",
        (ColumnType::Real, _) => "REAL",
        (ColumnType::Blob, _) => "BLOB",
    }
}

/// Returns the declared SQL type for a column definition.
#[must_use]
pub const fn declared_type_of(column: &Column) -> &'static str {
    declared_type(column.column_type, column.mode)
}

/// Infers the canonical type and mode from a declared type as reported by
/// the catalog.
///
/// Recognized spellings come first; anything else falls back to the
/// engine's affinity rules.
#[must_use]
pub fn infer_type(declared: &str) -> (ColumnType, Option<ColumnMode>) {
    let upper = declared.trim().to_ascii_uppercase();

    if upper.contains("TIMESTAMP") || upper.contains("DATETIME") {
        return (ColumnType::Integer, Some(ColumnMode::TimestampMs));
    }
    if upper.contains("BOOL") {
        return (ColumnType::Integer, Some(ColumnMode::Boolean));
    }
    if upper.contains("JSON") {
        return (ColumnType::Text, None);
    }

    if upper.contains("INT") {
        (ColumnType::Integer, None)
    } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        (ColumnType::Text, None)
    } else if upper.is_empty() || upper.contains("BLOB") {
        (ColumnType::Blob, None)
    } else {
        // REAL, FLOA, DOUB and NUMERIC affinity all store as floating point
        // for the purposes of comparison.
        (ColumnType::Real, None)
    }
}

/// Returns whether a stored column of type `current` can hold values of the
/// target type without rewriting.
#[must_use]
pub fn storage_compatible(target: ColumnType, current: ColumnType) -> bool {
    storage_class(target) == storage_class(current)
}

const fn storage_class(column_type: ColumnType) -> ColumnType {
    match column_type {
        ColumnType::Json => ColumnType::Text,
        other => other,
    }
}
