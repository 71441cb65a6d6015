//! SQL pattern validator.
//!
//! Classifies a query against a fixed, ordered set of deny rules and then a
//! read-verb allow-list. The first matching deny rule wins. A query that
//! matches no deny rule but does not start with an allow-listed verb is still
//! rejected.
//!
//! This is a lexical firewall. It does not parse SQL and cannot see through
//! escaping, encodings or dialect-specific syntax.

use crate::security::decision::{Decision, DecisionReason};
use crate::security::query::Query;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// A single named deny pattern.
#[derive(Debug)]
pub struct DenyRule {
    name: &'static str,
    pattern: Regex,
}

impl DenyRule {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern)
                .unwrap_or_else(|e| panic!("Invalid regex for deny rule {}: {}", name, e)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Deny rules in evaluation order.
/// All patterns are compile-time constants.
static DENY_RULES: Lazy<Vec<DenyRule>> = Lazy::new(|| {
    vec![
        DenyRule::new(
            "mutating_keyword",
            r"(?i)\b(DELETE|DROP|TRUNCATE|ALTER|CREATE|INSERT|UPDATE|GRANT|REVOKE)\b",
        ),
        DenyRule::new(
            "procedural_execution",
            r"(?i)\b(EXEC|EXECUTE)\b|\b(SP|XP)_\w*",
        ),
        DenyRule::new("line_comment", r"(?m)--.*$"),
        DenyRule::new("block_comment", r"/\*|\*/"),
        DenyRule::new("trailing_separator", r"(?m);\s*$"),
        DenyRule::new("union_all_select", r"(?i)UNION\s+ALL\s+SELECT"),
        DenyRule::new(
            "schema_enumeration",
            r"(?i)INFORMATION_SCHEMA\s*\.\s*(TABLES|COLUMNS)",
        ),
    ]
});

/// Read verbs a query may start with.
static READ_ONLY_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(SELECT|WITH|SHOW|DESCRIBE)\b").expect("Invalid regex: read verb prefix")
});

/// SQL pattern validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlValidator;

impl SqlValidator {
    pub fn new() -> Self {
        Self
    }

    /// The deny rule table, in evaluation order.
    pub fn deny_rules(&self) -> &'static [DenyRule] {
        &DENY_RULES
    }

    /// Validate a query against the deny rules and the read-verb allow-list.
    pub fn validate(&self, query: &Query) -> Decision {
        debug!("Validating query: {}", query.preview());

        if let Some(rule) = self.first_match(query.normalized()) {
            warn!(rule = rule.name(), "Forbidden SQL pattern detected");
            return Decision::deny_with_rule(DecisionReason::DeniedPattern, rule.name());
        }

        if !READ_ONLY_PREFIX.is_match(query.normalized()) {
            warn!("Query does not start with an allowed read verb");
            return Decision::deny(DecisionReason::DeniedNotReadOnly);
        }

        Decision::allow()
    }

    /// The first deny rule matching `text`, if any.
    pub fn first_match(&self, text: &str) -> Option<&'static DenyRule> {
        DENY_RULES.iter().find(|rule| rule.is_match(text))
    }
}
