//! Lightweight statement classification
//!
//! Only the leading keyword is inspected. This is enough to route a
//! statement to the read path (no write lock, cacheable) or the write path,
//! and to detect schema changes that must invalidate cached metadata.

use once_cell::sync::Lazy;
use regex::Regex;

static LEADING_COMMENTS: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(?:\s+|--[^\n]*(?:\n|$)|/\*(?s:.*?)\*/)*").ok());

/// Broad category of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Returns rows and changes nothing
    Read,
    /// Changes data
    Write,
    /// Changes the schema
    Ddl,
}

impl StatementKind {
    /// Classify `sql` by its first keyword.
    ///
    /// `EXPLAIN ANALYZE` executes the explained statement and
    /// `SELECT ... INTO` creates a table, so both count as writes.
    pub fn classify(sql: &str) -> Self {
        let words = leading_words(sql);
        let keyword = words.first().map(String::as_str).unwrap_or_default();
        match keyword {
            "select" if words.iter().any(|w| w == "into") => StatementKind::Write,
            "explain" if words.iter().any(|w| w == "analyze" || w == "analyse") => {
                StatementKind::Write
            }
            "select" | "show" | "describe" | "desc" | "explain" | "values" => StatementKind::Read,
            "create" | "alter" | "drop" | "truncate" | "rename" | "comment" => StatementKind::Ddl,
            _ => StatementKind::Write,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, StatementKind::Read)
    }

    pub fn changes_schema(&self) -> bool {
        matches!(self, StatementKind::Ddl)
    }
}

/// Whether a result of `sql` may be stored in the query cache: only plain
/// read-only `SELECT` statements qualify
pub fn is_cacheable_select(sql: &str) -> bool {
    leading_keyword(sql) == "select" && StatementKind::classify(sql).is_read_only()
}

/// Whether the driver should fetch rows for this statement
pub fn returns_rows(sql: &str) -> bool {
    let keyword = leading_keyword(sql);
    matches!(
        keyword.as_str(),
        "select" | "show" | "describe" | "desc" | "explain" | "values" | "with" | "pragma"
    ) || sql.to_lowercase().contains(" returning ")
}

/// Collapse every whitespace run to a single space
pub fn normalize_whitespace(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_leading_comments(sql: &str) -> &str {
    match LEADING_COMMENTS.as_ref().and_then(|re| re.find(sql)) {
        Some(m) => &sql[m.end()..],
        None => sql,
    }
}

fn leading_keyword(sql: &str) -> String {
    strip_leading_comments(sql)
        .trim_start_matches('(')
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Lowercased words of the statement, comments before the first one skipped
fn leading_words(sql: &str) -> Vec<String> {
    strip_leading_comments(sql)
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}
