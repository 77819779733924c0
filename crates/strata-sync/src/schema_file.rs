//! Loading schemas from JSON files.

use std::collections::HashSet;
use std::path::Path;

use strata_core::{ColumnType, Schema};

use crate::error::SchemaFileError;

/// Reads and validates a schema document.
pub fn load_schema(path: &Path) -> Result<Schema, SchemaFileError> {
    let contents = std::fs::read_to_string(path)?;
    let schema: Schema =
        serde_json::from_str(&contents).map_err(|e| SchemaFileError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    validate_schema(&schema)?;
    Ok(schema)
}

/// Checks the internal consistency of a schema.
pub fn validate_schema(schema: &Schema) -> Result<(), SchemaFileError> {
    if schema.name.trim().is_empty() {
        return Err(SchemaFileError::Invalid("schema name is empty".into()));
    }

    let mut tables = HashSet::new();
    for table in &schema.tables {
        if !tables.insert(table.name.as_str()) {
            return Err(SchemaFileError::Invalid(format!(
                "duplicate table '{}'",
                table.name
            )));
        }
        if table.columns.is_empty() {
            return Err(SchemaFileError::Invalid(format!(
                "table '{}' has no columns",
                table.name
            )));
        }

        let mut columns = HashSet::new();
        for column in &table.columns {
            if !columns.insert(column.name.as_str()) {
                return Err(SchemaFileError::Invalid(format!(
                    "duplicate column '{}.{}'",
                    table.name, column.name
                )));
            }
        }

        let mut auto_increment = table.columns.iter().filter(|c| c.auto_increment);
        if let Some(column) = auto_increment.next() {
            let single_pk = table.primary_key().is_some_and(|pk| pk.name == column.name);
            if auto_increment.next().is_some()
                || !single_pk
                || column.column_type != ColumnType::Integer
            {
                return Err(SchemaFileError::Invalid(format!(
                    "table '{}': autoIncrement is only allowed on a single INTEGER primary key",
                    table.name
                )));
            }
        }

        let mut indexes = HashSet::new();
        for index in &table.indexes {
            if !indexes.insert(index.name.as_str()) {
                return Err(SchemaFileError::Invalid(format!(
                    "duplicate index '{}' on '{}'",
                    index.name, table.name
                )));
            }
            if index.columns.is_empty() {
                return Err(SchemaFileError::Invalid(format!(
                    "index '{}' has no columns",
                    index.name
                )));
            }
            if let Some(missing) = index.columns.iter().find(|c| !columns.contains(c.as_str())) {
                return Err(SchemaFileError::Invalid(format!(
                    "index '{}' references unknown column '{}.{}'",
                    index.name, table.name, missing
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use strata_core::{Column, Index, Table};

    #[test]
    fn test_load_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"name": "app", "tables": [{{"name": "t", "columns": [{{"name": "id", "type": "integer", "primaryKey": true, "autoIncrement": true}}]}}]}}"#
        )
        .unwrap();

        let schema = load_schema(file.path()).unwrap();
        assert_eq!(schema.name, "app");
        assert!(schema.tables[0].columns[0].auto_increment);
    }

    #[test]
    fn test_parse_error_names_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = load_schema(file.path()).unwrap_err();
        assert!(matches!(err, SchemaFileError::Parse { ref path, .. } if path == file.path()));
    }

    #[test]
    fn test_missing_file() {
        let err = load_schema(Path::new("/nonexistent/strata/schema.json")).unwrap_err();
        assert!(matches!(err, SchemaFileError::Io(_)));
    }

    #[test]
    fn test_rejects_duplicates_and_unknown_index_columns() {
        let dup = Schema::new("app")
            .table(Table::new("t").column(Column::text("a")))
            .table(Table::new("t").column(Column::text("a")));
        assert!(validate_schema(&dup).is_err());

        let dup_col = Schema::new("app").table(
            Table::new("t")
                .column(Column::text("a"))
                .column(Column::integer("a")),
        );
        assert!(validate_schema(&dup_col).is_err());

        let bad_index = Schema::new("app").table(
            Table::new("t")
                .column(Column::text("a"))
                .index(Index::new("idx", &["b"])),
        );
        assert!(validate_schema(&bad_index).is_err());
    }

    #[test]
    fn test_auto_increment_rules() {
        let ok = Schema::new("app").table(
            Table::new("t").column(Column::integer("id").primary_key().auto_increment()),
        );
        assert!(validate_schema(&ok).is_ok());

        let text_pk = Schema::new("app").table(
            Table::new("t").column(Column::text("id").primary_key().auto_increment()),
        );
        assert!(validate_schema(&text_pk).is_err());

        let not_pk = Schema::new("app").table(
            Table::new("t")
                .column(Column::integer("id").primary_key())
                .column(Column::integer("n").auto_increment()),
        );
        assert!(validate_schema(&not_pk).is_err());
    }
}
