//! Schema representation types.
//!
//! These types describe the tables a host application expects. They are used
//! both as the synchronization target and as the result of introspecting a
//! live database, and by the table clients to learn which columns hold JSON.
//! The model is plain data: nothing here performs I/O.

use serde::{Deserialize, Serialize};

use crate::value::{SqlValue, ToSqlValue};

/// Canonical column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// 64-bit integer.
    Integer,
    /// UTF-8 text.
    Text,
    /// Double precision float.
    Real,
    /// Binary large object.
    Blob,
    /// JSON document, stored as text.
    Json,
}

/// Semantic mode layered over a storage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnMode {
    /// Milliseconds since the Unix epoch, stored as an integer.
    TimestampMs,
    /// Boolean stored as 0/1.
    Boolean,
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DefaultValue {
    /// A literal embedded (escaped) in the DDL.
    Value(SqlValue),
    /// A SQL expression (e.g. `CURRENT_TIMESTAMP` or `json_array()`).
    Raw(String),
}

impl DefaultValue {
    /// Creates a literal default.
    pub fn value(value: impl ToSqlValue) -> Self {
        Self::Value(value.to_sql_value())
    }

    /// Creates an expression default.
    pub fn raw(expr: impl Into<String>) -> Self {
        Self::Raw(expr.into())
    }
}

/// Foreign key action (ON DELETE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ForeignKeyAction {
    /// No action (error if referenced row is deleted).
    #[default]
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }

    /// Parses the catalog spelling of an action.
    #[must_use]
    pub fn from_sql(sql: &str) -> Self {
        match sql.trim().to_ascii_uppercase().as_str() {
            "RESTRICT" => Self::Restrict,
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            _ => Self::NoAction,
        }
    }
}

/// Column-level reference to another table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    /// Referenced table.
    pub table: String,
    /// Referenced column.
    pub column: String,
    /// Action on delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ForeignKeyAction>,
}

/// Schema definition for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Storage type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Semantic mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ColumnMode>,
    /// Whether the column rejects NULL.
    #[serde(default)]
    pub not_null: bool,
    /// Whether this column is (part of) the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Whether this column auto-increments.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_increment: bool,
    /// Whether this column has a UNIQUE constraint.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Foreign key target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignKey>,
    /// Allowed values, enforced with a CHECK constraint.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl Column {
    /// Creates a new nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            mode: None,
            not_null: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
            default: None,
            references: None,
            enum_values: None,
        }
    }

    /// Creates an INTEGER column.
    #[must_use]
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    /// Creates a TEXT column.
    #[must_use]
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    /// Creates a REAL column.
    #[must_use]
    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Real)
    }

    /// Creates a BLOB column.
    #[must_use]
    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Blob)
    }

    /// Creates a JSON column.
    #[must_use]
    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Json)
    }

    /// Creates an integer column holding epoch milliseconds.
    #[must_use]
    pub fn timestamp_ms(name: impl Into<String>) -> Self {
        Self::integer(name).mode(ColumnMode::TimestampMs)
    }

    /// Creates an integer column holding a boolean.
    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::integer(name).mode(ColumnMode::Boolean)
    }

    /// Sets the semantic mode.
    #[must_use]
    pub const fn mode(mut self, mode: ColumnMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Sets the column as the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    /// Sets the column to auto-increment.
    #[must_use]
    pub const fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Sets the column as unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets a literal default.
    #[must_use]
    pub fn default_value(mut self, value: impl ToSqlValue) -> Self {
        self.default = Some(DefaultValue::value(value));
        self
    }

    /// Sets an expression default.
    #[must_use]
    pub fn default_raw(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(DefaultValue::raw(expr));
        self
    }

    /// Adds a foreign key reference.
    #[must_use]
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
            on_delete: None,
        });
        self
    }

    /// Sets the ON DELETE action of the foreign key, if any.
    #[must_use]
    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        if let Some(fk) = self.references.as_mut() {
            fk.on_delete = Some(action);
        }
        self
    }

    /// Restricts the column to a fixed set of values.
    #[must_use]
    pub fn enum_values(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| (*v).to_string()).collect());
        self
    }

    /// Returns whether the column carries a constraint that `ALTER TABLE ADD
    /// COLUMN` cannot express, so it must exist when the table is created.
    #[must_use]
    pub const fn requires_creation(&self) -> bool {
        self.primary_key || self.unique || self.references.is_some() || self.enum_values.is_some()
    }

    /// Returns whether values are JSON documents.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.column_type == ColumnType::Json
    }
}

/// Schema definition for an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Columns included in the index, in order.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    #[serde(default)]
    pub unique: bool,
}

impl Index {
    /// Creates a non-unique index.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            unique: false,
        }
    }

    /// Makes the index unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Complete schema definition for a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Column definitions, in declaration order.
    pub columns: Vec<Column>,
    /// Index definitions.
    #[serde(default)]
    pub indexes: Vec<Index>,
}

impl Table {
    /// Creates a new table with no columns.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Adds a column to the table.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Gets an index by name.
    #[must_use]
    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Returns the primary key columns, in declaration order.
    pub fn primary_key_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    /// Returns the single primary key column, if the key is not composite.
    #[must_use]
    pub fn primary_key(&self) -> Option<&Column> {
        let mut keys = self.primary_key_columns();
        match (keys.next(), keys.next()) {
            (Some(pk), None) => Some(pk),
            _ => None,
        }
    }

    /// Returns column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// A named set of tables; the unit of synchronization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Schema name; identifies the bookkeeping row.
    pub name: String,
    /// Optional application-defined version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// All tables.
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl Schema {
    /// Creates a new empty schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            tables: Vec::new(),
        }
    }

    /// Sets the version.
    #[must_use]
    pub const fn version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    /// Adds a table to the schema.
    #[must_use]
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// Gets a table by name.
    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Returns table names.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_builder() {
        let col = Column::integer("id").primary_key().auto_increment();

        assert_eq!(col.name, "id");
        assert!(col.primary_key);
        assert!(col.auto_increment);
        assert!(col.not_null);
        assert!(col.requires_creation());
    }

    #[test]
    fn test_requires_creation() {
        assert!(!Column::text("bio").requires_creation());
        assert!(Column::text("email").unique().requires_creation());
        assert!(Column::integer("author_id")
            .references("users", "id")
            .requires_creation());
        assert!(Column::text("status")
            .enum_values(&["draft", "published"])
            .requires_creation());
    }

    #[test]
    fn test_table_lookup() {
        let table = Table::new("users")
            .column(Column::integer("id").primary_key())
            .column(Column::text("name").not_null())
            .index(Index::new("idx_users_name", &["name"]));

        assert_eq!(table.primary_key().map(|c| c.name.as_str()), Some("id"));
        assert!(table.get_column("name").is_some());
        assert!(table.get_index("idx_users_name").is_some());
        assert_eq!(table.column_names().collect::<Vec<_>>(), vec!["id", "name"]);
    }

    #[test]
    fn test_composite_key_has_no_single_pk() {
        let table = Table::new("memberships")
            .column(Column::integer("user_id").primary_key())
            .column(Column::integer("group_id").primary_key());
        assert!(table.primary_key().is_none());
        assert_eq!(table.primary_key_columns().count(), 2);
    }

    #[test]
    fn test_schema_json_shape() {
        let json = r#"{
            "name": "app",
            "version": 2,
            "tables": [{
                "name": "posts",
                "columns": [
                    {"name": "id", "type": "integer", "primaryKey": true, "notNull": true},
                    {"name": "meta", "type": "json", "default": {"raw": "json_object()"}},
                    {"name": "published", "type": "integer", "mode": "boolean",
                     "notNull": true, "default": {"value": 0}},
                    {"name": "author_id", "type": "integer",
                     "references": {"table": "users", "column": "id", "onDelete": "cascade"}}
                ],
                "indexes": [{"name": "idx_posts_author", "columns": ["author_id"]}]
            }]
        }"#;
        let schema: Schema = serde_json::from_str(json).unwrap();
        let posts = schema.get_table("posts").unwrap();

        assert_eq!(schema.version, Some(2));
        assert!(posts.get_column("meta").unwrap().is_json());
        assert_eq!(
            posts.get_column("published").unwrap().default,
            Some(DefaultValue::Value(SqlValue::Int(0)))
        );
        assert_eq!(
            posts
                .get_column("author_id")
                .unwrap()
                .references
                .as_ref()
                .unwrap()
                .on_delete,
            Some(ForeignKeyAction::Cascade)
        );
        assert!(!posts.indexes[0].unique);
    }
}
