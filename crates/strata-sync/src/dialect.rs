//! SQLite DDL generation.
//!
//! SQLite has limited ALTER TABLE support, so anything beyond adding or
//! dropping a plain column goes through table recreation: create a new
//! table, copy data, drop the old table, rename the new table.

use strata_core::{declared_type_of, Column, DefaultValue, Index, Table};

use crate::defaults::{is_current_keyword, is_literal, strip_outer_parens};

/// Prefix of the temporary table used during recreation.
pub const RECREATE_PREFIX: &str = "__strata_new_";

/// SQLite DDL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Quotes an identifier (table name, column name, etc.).
    #[must_use]
    pub fn quote_identifier(&self, name: &str) -> String {
        strata_core::quote_identifier(name)
    }

    fn quote_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.quote_identifier(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Renders a `DEFAULT` operand.
    ///
    /// SQLite only accepts bare literals and the `CURRENT_*` keywords;
    /// any other expression must be parenthesized.
    #[must_use]
    pub fn default_sql(&self, default: &DefaultValue) -> String {
        match default {
            DefaultValue::Value(value) => value.to_sql_inline(),
            DefaultValue::Raw(expr) => {
                let expr = expr.trim();
                if is_literal(expr) || is_current_keyword(expr) || is_parenthesized(expr) {
                    expr.to_string()
                } else {
                    format!("({expr})")
                }
            }
        }
    }

    /// Generates the definition of one column.
    ///
    /// `inline_pk` is false for composite keys, which are declared at table
    /// level instead.
    #[must_use]
    pub fn column_definition(&self, column: &Column, inline_pk: bool) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            declared_type_of(column).to_string(),
        ];

        let inline_pk = inline_pk && column.primary_key;
        if inline_pk {
            parts.push("PRIMARY KEY".to_string());
            if column.auto_increment {
                parts.push("AUTOINCREMENT".to_string());
            }
        }

        if column.not_null && !inline_pk {
            parts.push("NOT NULL".to_string());
        }

        if column.unique && !column.primary_key {
            parts.push("UNIQUE".to_string());
        }

        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {}", self.default_sql(default)));
        }

        if let Some(fk) = &column.references {
            let mut clause = format!(
                "REFERENCES {}({})",
                self.quote_identifier(&fk.table),
                self.quote_identifier(&fk.column)
            );
            if let Some(action) = fk.on_delete {
                clause.push_str(" ON DELETE ");
                clause.push_str(action.to_sql());
            }
            parts.push(clause);
        }

        if let Some(values) = &column.enum_values {
            let allowed: Vec<String> = values
                .iter()
                .map(|v| format!("'{}'", v.replace('\'', "''")))
                .collect();
            parts.push(format!(
                "CHECK ({} IN ({}))",
                self.quote_identifier(&column.name),
                allowed.join(", ")
            ));
        }

        parts.join(" ")
    }

    /// Generates `CREATE TABLE` for a full table definition.
    #[must_use]
    pub fn create_table_sql(&self, table: &Table) -> String {
        self.create_table_named(&table.name, table)
    }

    fn create_table_named(&self, name: &str, table: &Table) -> String {
        let pk: Vec<String> = table
            .primary_key_columns()
            .map(|c| c.name.clone())
            .collect();
        let inline_pk = pk.len() == 1;

        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c, inline_pk))
            .collect();
        if pk.len() > 1 {
            defs.push(format!("PRIMARY KEY ({})", self.quote_list(&pk)));
        }

        format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(name),
            defs.join(",\n  ")
        )
    }

    /// Generates `CREATE [UNIQUE] INDEX IF NOT EXISTS`.
    #[must_use]
    pub fn create_index_sql(&self, table: &str, index: &Index) -> String {
        let mut sql = String::from("CREATE ");
        if index.unique {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX IF NOT EXISTS ");
        sql.push_str(&self.quote_identifier(&index.name));
        sql.push_str(" ON ");
        sql.push_str(&self.quote_identifier(table));
        sql.push_str(" (");
        sql.push_str(&self.quote_list(&index.columns));
        sql.push(')');
        sql
    }

    /// Generates `DROP INDEX IF EXISTS`.
    #[must_use]
    pub fn drop_index_sql(&self, name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", self.quote_identifier(name))
    }

    /// Generates `ALTER TABLE .. ADD COLUMN`.
    #[must_use]
    pub fn add_column_sql(&self, table: &str, column: &Column) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(column, false)
        )
    }

    /// Generates `ALTER TABLE .. DROP COLUMN` (SQLite 3.35.0+).
    #[must_use]
    pub fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(column)
        )
    }

    /// Generates the recreation sequence that replaces `current` with
    /// `target`, keeping the data of columns present in both.
    #[must_use]
    pub fn recreate_table_sql(&self, current: &Table, target: &Table) -> Vec<String> {
        let temp = format!("{RECREATE_PREFIX}{}", target.name);
        let shared: Vec<String> = target
            .columns
            .iter()
            .filter(|c| current.get_column(&c.name).is_some())
            .map(|c| c.name.clone())
            .collect();

        // A failed earlier attempt may have left the temporary table behind.
        let mut statements = vec![
            format!("DROP TABLE IF EXISTS {}", self.quote_identifier(&temp)),
            self.create_table_named(&temp, target),
        ];
        if !shared.is_empty() {
            let cols = self.quote_list(&shared);
            statements.push(format!(
                "INSERT INTO {} ({cols}) SELECT {cols} FROM {}",
                self.quote_identifier(&temp),
                self.quote_identifier(&current.name)
            ));
        }
        statements.push(format!("DROP TABLE {}", self.quote_identifier(&current.name)));
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(&temp),
            self.quote_identifier(&target.name)
        ));
        statements.extend(
            target
                .indexes
                .iter()
                .map(|i| self.create_index_sql(&target.name, i)),
        );
        statements
    }
}

fn is_parenthesized(expr: &str) -> bool {
    strip_outer_parens(expr).is_some()
}
