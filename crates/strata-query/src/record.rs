//! Conversion between JSON records and SQL values.
//!
//! Reads and writes go through the table definition when one is known:
//! JSON columns are serialized before binding and parsed after reading, and
//! boolean-mode integers come back as `true`/`false`.

use serde_json::{Map, Number, Value};
use strata_core::{Column, ColumnMode, ColumnType, Row, SqlValue, Table};
use tracing::warn;

use crate::error::Result;
use crate::filter::check_identifier;

/// A row as a JSON object, keyed by column name.
pub type Record = Map<String, Value>;

/// Converts a JSON value into a bind parameter.
///
/// Non-null values bound to a JSON column are always stored as their
/// serialized text. Without a column, arrays and objects are serialized too.
#[must_use]
pub fn json_to_sql(value: &Value, column: Option<&Column>) -> SqlValue {
    if let Some(column) = column {
        if column.is_json() && !value.is_null() {
            return SqlValue::Text(value.to_string());
        }
        if column.column_type == ColumnType::Blob {
            if let Some(bytes) = as_bytes(value) {
                return SqlValue::Blob(bytes);
            }
        }
    }

    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Int(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map_or_else(|| SqlValue::Float(n.as_f64().unwrap_or(f64::NAN)), SqlValue::Int),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn as_bytes(value: &Value) -> Option<Vec<u8>> {
    let Value::Array(items) = value else {
        return None;
    };
    items
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

/// Converts a value read from the engine back into JSON.
#[must_use]
pub fn sql_to_json(value: SqlValue, column: Option<&Column>) -> Value {
    match (value, column) {
        (SqlValue::Null, _) => Value::Null,
        (SqlValue::Int(n), Some(c)) if c.mode == Some(ColumnMode::Boolean) => Value::Bool(n != 0),
        (SqlValue::Text(s), Some(c)) if c.is_json() => {
            serde_json::from_str(&s).unwrap_or_else(|e| {
                warn!(column = %c.name, error = %e, "stored JSON does not parse; returning text");
                Value::String(s)
            })
        }
        (SqlValue::Int(n), _) => Value::Number(n.into()),
        (SqlValue::Float(f), _) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        (SqlValue::Text(s), _) => Value::String(s),
        (SqlValue::Blob(b), _) => Value::Array(b.into_iter().map(Value::from).collect()),
    }
}

/// Converts a result row into a record.
#[must_use]
pub fn row_to_record(row: Row, table: Option<&Table>) -> Record {
    row.into_iter()
        .map(|(name, value)| {
            let column = table.and_then(|t| t.get_column(&name));
            let json = sql_to_json(value, column);
            (name, json)
        })
        .collect()
}

/// Prepares a record for `INSERT` or `UPDATE`.
///
/// Fields the table does not declare are dropped with a warning. Returns the
/// column names and their parameters in the record's order.
pub(crate) fn prepare_write(
    record: &Record,
    table_name: &str,
    table: Option<&Table>,
) -> Result<(Vec<String>, Vec<SqlValue>)> {
    let mut columns = Vec::with_capacity(record.len());
    let mut params = Vec::with_capacity(record.len());

    for (field, value) in record {
        let column = match table {
            Some(t) => match t.get_column(field) {
                Some(column) => Some(column),
                None => {
                    warn!(table = table_name, field = %field, "dropping unknown field");
                    continue;
                }
            },
            None => None,
        };
        check_identifier(field)?;
        columns.push(field.clone());
        params.push(json_to_sql(value, column));
    }

    Ok((columns, params))
}
