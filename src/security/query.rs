//! Query and caller identity.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Line comments (`--` to end of line).
static LINE_COMMENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)--.*$").expect("Invalid regex: line comment pattern"));

/// Block comments, including an unterminated trailing one.
static BLOCK_COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)/\*.*?(\*/|\z)").expect("Invalid regex: block comment pattern")
});

/// Allow-listed read verbs counted as statements.
static READ_VERB_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(SELECT|WITH|SHOW|DESCRIBE)\b").expect("Invalid regex: read verb pattern")
});

/// A SQL statement submitted for authorization.
///
/// `normalized` is the trimmed upper-case form used for pattern matching only;
/// the text that reaches the database is always [`Query::text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
    length: usize,
    statement_count: usize,
    normalized: String,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let length = text.chars().count();
        let statement_count = count_read_statements(&text);
        let normalized = text.trim().to_uppercase();
        Self {
            text,
            length,
            statement_count,
            normalized,
        }
    }

    /// The caller's text, unmodified.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of read-verb keywords outside of comments.
    pub fn statement_count(&self) -> usize {
        self.statement_count
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// First 100 characters, for log lines.
    pub fn preview(&self) -> &str {
        match self.text.char_indices().nth(100) {
            Some((idx, _)) => &self.text[..idx],
            None => &self.text,
        }
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Count read-verb keywords after stripping line and block comments.
pub fn count_read_statements(text: &str) -> usize {
    let without_blocks = BLOCK_COMMENT_REGEX.replace_all(text, " ");
    let without_comments = LINE_COMMENT_REGEX.replace_all(&without_blocks, " ");
    READ_VERB_REGEX.find_iter(&without_comments).count()
}

/// Caller identity: rate-limit key and audit subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub session_id: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_keeps_original_text() {
        let query = Query::new("  select * from Users  ");
        assert_eq!(query.text(), "  select * from Users  ");
        assert_eq!(query.normalized(), "SELECT * FROM USERS");
        assert_eq!(query.len(), 23);
    }

    #[test]
    fn test_statement_count() {
        assert_eq!(count_read_statements("SELECT 1"), 1);
        assert_eq!(
            count_read_statements("WITH cte AS (SELECT 1) SELECT * FROM cte"),
            3
        );
        assert_eq!(count_read_statements("select a, selected FROM t"), 1);
    }

    #[test]
    fn test_statement_count_ignores_comments() {
        assert_eq!(count_read_statements("SELECT 1 -- SELECT SELECT"), 1);
        assert_eq!(count_read_statements("SELECT /* SELECT\nSELECT */ 1"), 1);
        assert_eq!(count_read_statements("SELECT 1 /* SELECT"), 1);
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let text = "é".repeat(150);
        let query = Query::new(text);
        assert_eq!(query.preview().chars().count(), 100);
    }

    #[test]
    fn test_identity_display() {
        let identity = Identity::new("alice", "s-1");
        assert_eq!(identity.to_string(), "alice/s-1");
    }
}
