//! SQL identifier quoting.
//!
//! Generated statements render names through [`render_identifier`], which
//! leaves plain words bare and quotes everything else, keywords included.

/// SQLite keywords, upper case and sorted.
const KEYWORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ALWAYS", "ANALYZE", "AND", "AS", "ASC",
    "ATTACH", "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE", "CAST",
    "CHECK", "COLLATE", "COLUMN", "COMMIT", "CONFLICT", "CONSTRAINT", "CREATE", "CROSS",
    "CURRENT", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATABASE", "DEFAULT",
    "DEFERRABLE", "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DO", "DROP", "EACH",
    "ELSE", "END", "ESCAPE", "EXCEPT", "EXCLUDE", "EXCLUSIVE", "EXISTS", "EXPLAIN", "FAIL",
    "FILTER", "FIRST", "FOLLOWING", "FOR", "FOREIGN", "FROM", "FULL", "GENERATED", "GLOB",
    "GROUP", "GROUPS", "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX", "INDEXED",
    "INITIALLY", "INNER", "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN",
    "KEY", "LAST", "LEFT", "LIKE", "LIMIT", "MATCH", "MATERIALIZED", "NATURAL", "NO", "NOT",
    "NOTHING", "NOTNULL", "NULL", "NULLS", "OF", "OFFSET", "ON", "OR", "ORDER", "OTHERS",
    "OUTER", "OVER", "PARTITION", "PLAN", "PRAGMA", "PRECEDING", "PRIMARY", "QUERY", "RAISE",
    "RANGE", "RECURSIVE", "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE",
    "RESTRICT", "RETURNING", "RIGHT", "ROLLBACK", "ROW", "ROWS", "SAVEPOINT", "SELECT", "SET",
    "TABLE", "TEMP", "TEMPORARY", "THEN", "TIES", "TO", "TRANSACTION", "TRIGGER", "UNBOUNDED",
    "UNION", "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW", "VIRTUAL", "WHEN",
    "WHERE", "WINDOW", "WITH", "WITHOUT",
];

/// Wraps `name` in double quotes, doubling embedded quotes.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Returns whether `word` is a SQLite keyword, ignoring case.
#[must_use]
pub fn is_keyword(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    KEYWORDS.binary_search(&upper.as_str()).is_ok()
}

fn is_plain_word(word: &str) -> bool {
    let mut chars = word.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Renders a single name, quoting it unless it is a plain non-keyword word.
#[must_use]
pub fn render_identifier(name: &str) -> String {
    if is_plain_word(name) && !is_keyword(name) {
        name.to_string()
    } else {
        quote_identifier(name)
    }
}

/// Renders a name that may carry one qualifier (`posts.title`,
/// `main.posts`), each part on its own.
#[must_use]
pub fn render_qualified(name: &str) -> String {
    match name.split_once('.') {
        Some((table, column)) => {
            format!("{}.{}", render_identifier(table), render_identifier(column))
        }
        None => render_identifier(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_are_sorted() {
        assert!(KEYWORDS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_plain_names_stay_bare() {
        assert_eq!(render_identifier("status"), "status");
        assert_eq!(render_identifier("created_at"), "created_at");
        assert_eq!(render_qualified("posts.userId"), "posts.userId");
    }

    #[test]
    fn test_keywords_and_odd_names_are_quoted() {
        assert_eq!(render_identifier("order"), "\"order\"");
        assert_eq!(render_identifier("Group"), "\"Group\"");
        assert_eq!(render_identifier("first name"), "\"first name\"");
        assert_eq!(render_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(render_qualified("order.group"), "\"order\".\"group\"");
    }
}
