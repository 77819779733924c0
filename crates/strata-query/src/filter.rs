//! The where compiler.
//!
//! A [`Filter`] maps column names to conditions and is ANDed together. A
//! query holds one or more [`WhereGroup`]s, ORed together, each combining a
//! filter with raw fragments. [`compile`] turns the groups into a predicate
//! with positional `?` parameters.
//!
//! # Example
//!
//! ```ignore
//! use strata_query::Filter;
//!
//! let active = Filter::new()
//!     .value("status", "active")
//!     .gte("age", 18);
//! let from_json = Filter::from_json(&serde_json::json!({
//!     "status": { "in": ["a", "b"] },
//!     "deletedAt": { "isNull": true },
//! }))?;
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use strata_core::{render_qualified, SqlValue, ToSqlValue};

use crate::error::{QueryError, Result};
use crate::record::json_to_sql;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("identifier regex")
});

static INTERPOLATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{|#\{|\{\{").expect("interpolation regex"));

static CONCATENATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\|\||'\s*\+|\+\s*'").expect("concatenation regex"));

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--|/\*|\*/").expect("comment regex"));

static STACKED_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i);\s*(select|insert|update|delete|drop|create|alter|replace|truncate|attach|detach|pragma|vacuum)\b",
    )
    .expect("stacked statement regex")
});

/// Returns whether `name` is a plain column identifier, optionally
/// qualified with a table name.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

pub(crate) fn check_identifier(name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(QueryError::InvalidField(name.to_string()))
    }
}

/// A single operator applied to a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `=` (`IS NULL` for NULL).
    Eq(SqlValue),
    /// `!=` (`IS NOT NULL` for NULL).
    Ne(SqlValue),
    /// `>`
    Gt(SqlValue),
    /// `>=`
    Gte(SqlValue),
    /// `<`
    Lt(SqlValue),
    /// `<=`
    Lte(SqlValue),
    /// `LIKE`
    Like(String),
    /// `IN (..)`
    In(Vec<SqlValue>),
    /// `NOT IN (..)`
    NotIn(Vec<SqlValue>),
    /// `IS NULL` when true, `IS NOT NULL` when false.
    IsNull(bool),
}

/// The condition attached to one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Equality shorthand; a text value containing `%` is a LIKE pattern.
    Literal(SqlValue),
    /// One or more operators, ANDed.
    Predicates(Vec<Predicate>),
}

/// Column conditions, ANDed in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    terms: Vec<(String, Condition)>,
}

impl Filter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the equality shorthand (`LIKE` when the text contains `%`).
    #[must_use]
    pub fn value(mut self, column: &str, value: impl ToSqlValue) -> Self {
        self.terms
            .push((column.to_string(), Condition::Literal(value.to_sql_value())));
        self
    }

    /// Adds an operator, merging with earlier operators on the same column.
    #[must_use]
    pub fn predicate(mut self, column: &str, predicate: Predicate) -> Self {
        let existing = self.terms.iter_mut().find_map(|(c, cond)| match cond {
            Condition::Predicates(preds) if c.as_str() == column => Some(preds),
            _ => None,
        });
        match existing {
            Some(preds) => preds.push(predicate),
            None => self
                .terms
                .push((column.to_string(), Condition::Predicates(vec![predicate]))),
        }
        self
    }

    /// `column = value`
    #[must_use]
    pub fn eq(self, column: &str, value: impl ToSqlValue) -> Self {
        self.predicate(column, Predicate::Eq(value.to_sql_value()))
    }

    /// `column != value`
    #[must_use]
    pub fn ne(self, column: &str, value: impl ToSqlValue) -> Self {
        self.predicate(column, Predicate::Ne(value.to_sql_value()))
    }

    /// `column > value`
    #[must_use]
    pub fn gt(self, column: &str, value: impl ToSqlValue) -> Self {
        self.predicate(column, Predicate::Gt(value.to_sql_value()))
    }

    /// `column >= value`
    #[must_use]
    pub fn gte(self, column: &str, value: impl ToSqlValue) -> Self {
        self.predicate(column, Predicate::Gte(value.to_sql_value()))
    }

    /// `column < value`
    #[must_use]
    pub fn lt(self, column: &str, value: impl ToSqlValue) -> Self {
        self.predicate(column, Predicate::Lt(value.to_sql_value()))
    }

    /// `column <= value`
    #[must_use]
    pub fn lte(self, column: &str, value: impl ToSqlValue) -> Self {
        self.predicate(column, Predicate::Lte(value.to_sql_value()))
    }

    /// `column LIKE pattern`
    #[must_use]
    pub fn like(self, column: &str, pattern: impl Into<String>) -> Self {
        self.predicate(column, Predicate::Like(pattern.into()))
    }

    /// `column IN (..)`
    #[must_use]
    pub fn is_in<V: ToSqlValue>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(ToSqlValue::to_sql_value).collect();
        self.predicate(column, Predicate::In(values))
    }

    /// `column NOT IN (..)`
    #[must_use]
    pub fn not_in<V: ToSqlValue>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(ToSqlValue::to_sql_value).collect();
        self.predicate(column, Predicate::NotIn(values))
    }

    /// `column IS NULL`
    #[must_use]
    pub fn is_null(self, column: &str) -> Self {
        self.predicate(column, Predicate::IsNull(true))
    }

    /// `column IS NOT NULL`
    #[must_use]
    pub fn is_not_null(self, column: &str) -> Self {
        self.predicate(column, Predicate::IsNull(false))
    }

    /// Appends every condition of `other`.
    #[must_use]
    pub fn and(mut self, other: Self) -> Self {
        self.terms.extend(other.terms);
        self
    }

    /// Returns `true` if the filter has no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Returns the conditions in order.
    #[must_use]
    pub fn terms(&self) -> &[(String, Condition)] {
        &self.terms
    }

    /// Parses the object form.
    ///
    /// Each key is a column. A scalar value is the equality shorthand; an
    /// object holds operators: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`, `like`,
    /// `in`, `notIn`, and the null checks `is`, `isNull` and `isNullish`.
    /// The null checks take `true` (or `null`) for `IS NULL` and `false` for
    /// `IS NOT NULL`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(QueryError::Validation("filter must be an object".into()));
        };

        let mut filter = Self::new();
        for (column, condition) in map {
            check_identifier(column)?;
            match condition {
                Value::Object(ops) => {
                    if ops.is_empty() {
                        return Err(QueryError::Validation(format!(
                            "empty operator object for '{column}'"
                        )));
                    }
                    for (op, operand) in ops {
                        filter = filter.predicate(column, parse_operator(column, op, operand)?);
                    }
                }
                literal => {
                    filter
                        .terms
                        .push((column.clone(), Condition::Literal(json_to_sql(literal, None))));
                }
            }
        }
        Ok(filter)
    }
}

fn parse_operator(column: &str, op: &str, operand: &Value) -> Result<Predicate> {
    let scalar = || json_to_sql(operand, None);
    let list = || match operand {
        Value::Array(items) => Ok(items
            .iter()
            .map(|v| json_to_sql(v, None))
            .collect::<Vec<_>>()),
        _ => Err(QueryError::Validation(format!(
            "'{op}' on '{column}' expects an array"
        ))),
    };

    Ok(match op {
        "eq" => Predicate::Eq(scalar()),
        "ne" => Predicate::Ne(scalar()),
        "gt" => Predicate::Gt(scalar()),
        "gte" => Predicate::Gte(scalar()),
        "lt" => Predicate::Lt(scalar()),
        "lte" => Predicate::Lte(scalar()),
        "like" => match operand {
            Value::String(pattern) => Predicate::Like(pattern.clone()),
            _ => {
                return Err(QueryError::Validation(format!(
                    "'like' on '{column}' expects a string"
                )))
            }
        },
        "in" => Predicate::In(list()?),
        "notIn" => Predicate::NotIn(list()?),
        "is" | "isNull" | "isNullish" => match operand {
            Value::Null | Value::Bool(true) => Predicate::IsNull(true),
            Value::Bool(false) => Predicate::IsNull(false),
            _ => {
                return Err(QueryError::Validation(format!(
                    "'{op}' on '{column}' only checks for null"
                )))
            }
        },
        other => {
            return Err(QueryError::Validation(format!(
                "unknown operator '{other}' on '{column}'"
            )))
        }
    })
}

/// A literal SQL snippet with its own parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFragment {
    sql: String,
    params: Vec<SqlValue>,
}

impl RawFragment {
    /// Validates and wraps a fragment.
    ///
    /// Rejects template interpolation markers, string concatenation, SQL
    /// comments, and a `;` followed by another statement. The number of `?` placeholders
    /// outside string literals must match `params`.
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Result<Self> {
        let sql = sql.into();
        let reject = |reason: &str| QueryError::UnsafeRawFragment {
            fragment: sql.clone(),
            reason: reason.to_string(),
        };

        if sql.trim().is_empty() {
            return Err(reject("fragment is empty"));
        }
        if INTERPOLATION.is_match(&sql) {
            return Err(reject("contains an interpolation marker"));
        }
        if CONCATENATION.is_match(&sql) {
            return Err(reject("contains string concatenation"));
        }
        if COMMENT.is_match(&sql) {
            return Err(reject("contains a comment"));
        }
        if STACKED_STATEMENT.is_match(&sql) {
            return Err(reject("contains a second statement"));
        }
        let placeholders = count_placeholders(&sql);
        if placeholders != params.len() {
            return Err(reject(&format!(
                "{placeholders} placeholder(s) for {} parameter(s)",
                params.len()
            )));
        }

        Ok(Self { sql, params })
    }

    /// Returns the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns the parameters.
    #[must_use]
    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }
}

fn count_placeholders(sql: &str) -> usize {
    let mut in_string = false;
    let mut count = 0;
    for ch in sql.chars() {
        match ch {
            '\'' => in_string = !in_string,
            '?' if !in_string => count += 1,
            _ => {}
        }
    }
    count
}

/// One OR-alternative: a filter and raw fragments, all ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereGroup {
    /// Structured conditions.
    pub filter: Filter,
    /// Raw fragments.
    pub raw: Vec<RawFragment>,
}

impl WhereGroup {
    /// Creates a group from a filter.
    #[must_use]
    pub fn from_filter(filter: Filter) -> Self {
        Self {
            filter,
            raw: Vec::new(),
        }
    }

    /// ANDs another group into this one.
    #[must_use]
    pub fn and(mut self, other: &Self) -> Self {
        self.filter = self.filter.and(other.filter.clone());
        self.raw.extend(other.raw.iter().cloned());
        self
    }

    /// Returns `true` if the group has no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filter.is_empty() && self.raw.is_empty()
    }

    fn render(&self, params: &mut Vec<SqlValue>) -> Result<Vec<String>> {
        let mut parts = Vec::new();
        for (column, condition) in self.filter.terms() {
            check_identifier(column)?;
            let column = render_qualified(column);
            match condition {
                Condition::Literal(value) => parts.push(render_literal(&column, value, params)),
                Condition::Predicates(preds) => {
                    for pred in preds {
                        parts.push(render_predicate(&column, pred, params));
                    }
                }
            }
        }
        for fragment in &self.raw {
            parts.push(format!("({})", fragment.sql));
            params.extend(fragment.params.iter().cloned());
        }
        Ok(parts)
    }
}

fn render_literal(column: &str, value: &SqlValue, params: &mut Vec<SqlValue>) -> String {
    match value {
        SqlValue::Null => format!("{column} IS NULL"),
        SqlValue::Text(s) if s.contains('%') => {
            params.push(value.clone());
            format!("{column} LIKE ?")
        }
        _ => {
            params.push(value.clone());
            format!("{column} = ?")
        }
    }
}

fn bind(column: &str, op: &str, value: &SqlValue, params: &mut Vec<SqlValue>) -> String {
    params.push(value.clone());
    format!("{column} {op} ?")
}

fn render_list(column: &str, op: &str, values: &[SqlValue], params: &mut Vec<SqlValue>) -> String {
    let placeholders = vec!["?"; values.len()].join(", ");
    params.extend(values.iter().cloned());
    format!("{column} {op} ({placeholders})")
}

fn render_predicate(column: &str, pred: &Predicate, params: &mut Vec<SqlValue>) -> String {
    match pred {
        Predicate::Eq(SqlValue::Null) | Predicate::IsNull(true) => format!("{column} IS NULL"),
        Predicate::Ne(SqlValue::Null) | Predicate::IsNull(false) => {
            format!("{column} IS NOT NULL")
        }
        Predicate::Eq(v) => bind(column, "=", v, params),
        Predicate::Ne(v) => bind(column, "!=", v, params),
        Predicate::Gt(v) => bind(column, ">", v, params),
        Predicate::Gte(v) => bind(column, ">=", v, params),
        Predicate::Lt(v) => bind(column, "<", v, params),
        Predicate::Lte(v) => bind(column, "<=", v, params),
        Predicate::Like(p) => bind(column, "LIKE", &SqlValue::Text(p.clone()), params),
        // Nothing is in the empty set.
        Predicate::In(values) if values.is_empty() => "1 = 0".to_string(),
        Predicate::NotIn(values) if values.is_empty() => "1 = 1".to_string(),
        Predicate::In(values) => render_list(column, "IN", values, params),
        Predicate::NotIn(values) => render_list(column, "NOT IN", values, params),
    }
}

/// Compiles OR-groups into a predicate and its parameters.
///
/// Returns `None` when no group has any condition. A single group renders
/// bare; several groups are ORed inside one pair of parentheses, each
/// multi-term group parenthesized itself.
pub fn compile(groups: &[WhereGroup]) -> Result<Option<(String, Vec<SqlValue>)>> {
    if groups.iter().all(WhereGroup::is_empty) {
        return Ok(None);
    }

    let mut params = Vec::new();
    if let [group] = groups {
        let parts = group.render(&mut params)?;
        return Ok(Some((parts.join(" AND "), params)));
    }

    let mut alternatives = Vec::with_capacity(groups.len());
    for group in groups {
        let parts = group.render(&mut params)?;
        alternatives.push(match parts.len() {
            // An empty alternative matches every row.
            0 => "1 = 1".to_string(),
            1 => parts.join(""),
            _ => format!("({})", parts.join(" AND ")),
        });
    }
    Ok(Some((format!("({})", alternatives.join(" OR ")), params)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile_one(filter: Filter) -> (String, Vec<SqlValue>) {
        compile(&[WhereGroup::from_filter(filter)]).unwrap().unwrap()
    }

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.to_string())
    }

    #[test]
    fn test_in_golden() {
        let filter = Filter::from_json(&json!({"status": {"in": ["a", "b"]}})).unwrap();
        let (sql, params) = compile_one(filter);
        assert_eq!(sql, "status IN (?, ?)");
        assert_eq!(params, vec![text("a"), text("b")]);
    }

    #[test]
    fn test_like_golden() {
        let filter = Filter::from_json(&json!({"name": {"like": "%x%"}})).unwrap();
        let (sql, params) = compile_one(filter);
        assert_eq!(sql, "name LIKE ?");
        assert_eq!(params, vec![text("%x%")]);
    }

    #[test]
    fn test_any_golden() {
        let groups = vec![
            WhereGroup::from_filter(Filter::new().value("role", "a")),
            WhereGroup::from_filter(Filter::new().value("role", "b")),
        ];
        let (sql, params) = compile(&groups).unwrap().unwrap();
        assert_eq!(sql, "(role = ? OR role = ?)");
        assert_eq!(params, vec![text("a"), text("b")]);
    }

    #[test]
    fn test_literal_shorthand() {
        let (sql, params) = compile_one(
            Filter::new()
                .value("name", "%ada%")
                .value("deleted_at", SqlValue::Null)
                .value("age", 30),
        );
        assert_eq!(sql, "name LIKE ? AND deleted_at IS NULL AND age = ?");
        assert_eq!(params, vec![text("%ada%"), SqlValue::Int(30)]);
    }

    #[test]
    fn test_operators_and_merge() {
        let (sql, params) = compile_one(
            Filter::new()
                .gte("age", 18)
                .lt("age", 65)
                .ne("role", "guest")
                .is_not_null("email"),
        );
        assert_eq!(
            sql,
            "age >= ? AND age < ? AND role != ? AND email IS NOT NULL"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_empty_lists() {
        let empty: Vec<i64> = Vec::new();
        let (sql, params) = compile_one(
            Filter::new()
                .is_in("id", empty.clone())
                .not_in("kind", empty),
        );
        assert_eq!(sql, "1 = 0 AND 1 = 1");
        assert!(params.is_empty());
    }

    #[test]
    fn test_null_operators_from_json() {
        let filter = Filter::from_json(&json!({
            "a": {"is": null},
            "b": {"isNull": false},
            "c": {"isNullish": true},
            "d": {"eq": null}
        }))
        .unwrap();
        let (sql, params) = compile_one(filter);
        assert_eq!(
            sql,
            "a IS NULL AND b IS NOT NULL AND c IS NULL AND d IS NULL"
        );
        assert!(params.is_empty());

        assert!(Filter::from_json(&json!({"a": {"is": 3}})).is_err());
        assert!(Filter::from_json(&json!({"a": {"between": [1, 2]}})).is_err());
        assert!(Filter::from_json(&json!({"a": {"in": 1}})).is_err());
    }

    #[test]
    fn test_multi_term_groups_are_parenthesized() {
        let groups = vec![
            WhereGroup::from_filter(Filter::new().value("a", 1).value("b", 2)),
            WhereGroup::from_filter(Filter::new().value("c", 3)),
        ];
        let (sql, _) = compile(&groups).unwrap().unwrap();
        assert_eq!(sql, "((a = ? AND b = ?) OR c = ?)");
    }

    #[test]
    fn test_raw_fragment_joins_group() {
        let raw = RawFragment::new("score > ? OR featured = 1", vec![SqlValue::Int(10)]).unwrap();
        let group = WhereGroup {
            filter: Filter::new().value("published", 1),
            raw: vec![raw],
        };
        let (sql, params) = compile(&[group]).unwrap().unwrap();
        assert_eq!(sql, "published = ? AND (score > ? OR featured = 1)");
        assert_eq!(params, vec![SqlValue::Int(1), SqlValue::Int(10)]);
    }

    #[test]
    fn test_unsafe_fragments_are_rejected() {
        for bad in [
            "name = '${user}'",
            "name = #{user}",
            "name = {{user}}",
            "name = 'a' || 'b'",
            "name = 'a' + 'b'",
            "1 = 1; DROP TABLE users",
            "1 = 1;delete from users",
            "1 = 1; /* c */ DROP TABLE users",
            "1 = 1;--\nDROP TABLE users",
            "name = ? -- trailing",
        ] {
            let err = RawFragment::new(bad, vec![]).unwrap_err();
            assert!(
                matches!(err, QueryError::UnsafeRawFragment { .. }),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn test_placeholder_count_must_match() {
        assert!(RawFragment::new("a = ? AND b = ?", vec![SqlValue::Int(1)]).is_err());
        assert!(RawFragment::new("a = '?' AND b = ?", vec![SqlValue::Int(1)]).is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(Filter::from_json(&json!({"a; DROP": 1})).is_err());
        let group = WhereGroup::from_filter(Filter::new().value("bad name", 1));
        assert!(matches!(
            compile(&[group]),
            Err(QueryError::InvalidField(_))
        ));
        assert!(is_identifier("users.id"));
        assert!(!is_identifier("users.id.x"));
    }

    #[test]
    fn test_empty_groups_compile_to_nothing() {
        assert!(compile(&[]).unwrap().is_none());
        assert!(compile(&[WhereGroup::default()]).unwrap().is_none());
    }
}
