//! Default expression handling.
//!
//! Engines echo defaults back in whatever spelling they were declared with,
//! and applications write the same default several ways. Comparison happens
//! on a normalized form so that neither difference is reported as drift.

use strata_core::{DefaultValue, SqlValue};

const CURRENT_KEYWORDS: &[&str] = &["current_timestamp", "current_date", "current_time"];

const TIME_FUNCTIONS: &[&str] = &[
    "datetime(",
    "date(",
    "time(",
    "julianday(",
    "unixepoch(",
    "strftime(",
];

/// Canonical spellings, checked after whitespace and case folding.
const FOLDS: &[(&str, &str)] = &[
    ("datetime('now')", "current_timestamp"),
    ("unixepoch()*1000", "epoch_ms"),
    ("strftime('%s','now')*1000", "epoch_ms"),
    ("cast(strftime('%s','now')asinteger)*1000", "epoch_ms"),
    ("cast(unixepoch('subsec')*1000asinteger)", "epoch_ms"),
    ("cast((julianday('now')-2440587.5)*86400000asinteger)", "epoch_ms"),
    ("json('[]')", "json_array()"),
    ("'[]'", "json_array()"),
    ("json('{}')", "json_object()"),
    ("'{}'", "json_object()"),
];

/// Returns the canonical form of a default expression.
///
/// Whitespace outside string literals is removed, keywords are lowercased,
/// redundant outer parentheses are stripped, and known synonyms are folded.
#[must_use]
pub fn normalize_default(expr: &str) -> String {
    let mut out = squash(expr);
    while let Some(inner) = strip_outer_parens(&out) {
        out = inner.to_string();
    }

    match out.as_str() {
        "true" => return "1".to_string(),
        "false" => return "0".to_string(),
        _ => {}
    }

    for (from, to) in FOLDS {
        if out == *from {
            return (*to).to_string();
        }
    }
    out
}

/// Returns the canonical form of a declared default, or `None` when the
/// column effectively has no default.
#[must_use]
pub fn normalize_declared(default: Option<&DefaultValue>) -> Option<String> {
    match default? {
        DefaultValue::Value(SqlValue::Null) => None,
        DefaultValue::Value(value) => Some(normalize_default(&value.to_sql_inline())),
        DefaultValue::Raw(expr) => Some(normalize_default(expr)),
    }
}

/// Returns whether an expression yields a different value per row, which
/// rules it out for `ALTER TABLE ADD COLUMN`.
#[must_use]
pub fn is_non_constant_default(expr: &str) -> bool {
    let normalized = normalize_default(expr);
    let n = normalized.as_str();

    if CURRENT_KEYWORDS.contains(&n) || matches!(n, "epoch_ms" | "json_array()" | "json_object()")
    {
        return true;
    }
    if TIME_FUNCTIONS.iter().any(|f| n.starts_with(f)) && n.ends_with(')') {
        return true;
    }
    // Anything else that is not a literal has to be parenthesized, and the
    // engine refuses parenthesized defaults when adding a column.
    !is_literal(n)
}

/// Returns whether an expression is a plain literal (number, string, NULL
/// or boolean keyword).
#[must_use]
pub fn is_literal(expr: &str) -> bool {
    let e = expr.trim();
    if ["null", "true", "false"]
        .iter()
        .any(|k| e.eq_ignore_ascii_case(k))
    {
        return true;
    }
    if e.parse::<i64>().is_ok() || e.parse::<f64>().is_ok_and(f64::is_finite) {
        return true;
    }
    is_quoted(e)
}

/// Returns whether an expression is one of the `CURRENT_*` keywords.
#[must_use]
pub fn is_current_keyword(expr: &str) -> bool {
    let lower = expr.trim().to_ascii_lowercase();
    CURRENT_KEYWORDS.contains(&lower.as_str())
}

/// Parses default text reported by the catalog.
#[must_use]
pub fn parse_default(text: &str) -> DefaultValue {
    let t = text.trim();

    if t.eq_ignore_ascii_case("null") {
        return DefaultValue::Value(SqlValue::Null);
    }
    if t.eq_ignore_ascii_case("true") {
        return DefaultValue::Value(SqlValue::Int(1));
    }
    if t.eq_ignore_ascii_case("false") {
        return DefaultValue::Value(SqlValue::Int(0));
    }
    if let Ok(n) = t.parse::<i64>() {
        return DefaultValue::Value(SqlValue::Int(n));
    }
    if let Ok(f) = t.parse::<f64>() {
        if f.is_finite() {
            return DefaultValue::Value(SqlValue::Float(f));
        }
    }
    if is_quoted(t) {
        let inner = &t[1..t.len() - 1];
        return DefaultValue::Value(SqlValue::Text(inner.replace("''", "'")));
    }
    DefaultValue::Raw(t.to_string())
}

fn is_quoted(e: &str) -> bool {
    if e.len() < 2 || !e.starts_with('\'') || !e.ends_with('\'') {
        return false;
    }
    // Every interior quote must be doubled.
    let inner = &e[1..e.len() - 1];
    inner.replace("''", "").find('\'').is_none()
}

/// Removes whitespace and lowercases, leaving string literals untouched.
fn squash(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut in_string = false;
    for ch in expr.trim().chars() {
        if ch == '\'' {
            in_string = !in_string;
            out.push(ch);
        } else if in_string {
            out.push(ch);
        } else if !ch.is_whitespace() {
            out.push(ch.to_ascii_lowercase());
        }
    }
    out
}

/// Strips one pair of parentheses if they enclose the whole expression.
pub(crate) fn strip_outer_parens(expr: &str) -> Option<&str> {
    let inner = expr.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0_i32;
    let mut in_string = false;
    for ch in inner.chars() {
        match ch {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}
