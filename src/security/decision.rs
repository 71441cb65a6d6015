//! Authorization verdicts.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Reason code attached to every decision. The serialized strings are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    Ok,
    DeniedPattern,
    DeniedNotReadOnly,
    DeniedTooLong,
    DeniedTooManyStatements,
    DeniedRateLimitedMinute,
    DeniedRateLimitedHour,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::DeniedPattern => "DENIED_PATTERN",
            Self::DeniedNotReadOnly => "DENIED_NOT_READ_ONLY",
            Self::DeniedTooLong => "DENIED_TOO_LONG",
            Self::DeniedTooManyStatements => "DENIED_TOO_MANY_STATEMENTS",
            Self::DeniedRateLimitedMinute => "DENIED_RATE_LIMITED_MINUTE",
            Self::DeniedRateLimitedHour => "DENIED_RATE_LIMITED_HOUR",
        }
    }

    /// Rate denials are the only time-varying outcome.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::DeniedRateLimitedMinute | Self::DeniedRateLimitedHour
        )
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allow/deny verdict for one authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    allowed: bool,
    reason: DecisionReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    matched_rule: Option<Cow<'static, str>>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: DecisionReason::Ok,
            matched_rule: None,
        }
    }

    pub fn deny(reason: DecisionReason) -> Self {
        debug_assert!(reason != DecisionReason::Ok);
        Self {
            allowed: false,
            reason,
            matched_rule: None,
        }
    }

    pub fn deny_with_rule(reason: DecisionReason, rule: impl Into<Cow<'static, str>>) -> Self {
        Self {
            matched_rule: Some(rule.into()),
            ..Self::deny(reason)
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn reason(&self) -> DecisionReason {
        self.reason
    }

    pub fn matched_rule(&self) -> Option<&str> {
        self.matched_rule.as_deref()
    }

    /// Operator-facing explanation.
    pub fn message(&self) -> String {
        match (self.reason, self.matched_rule()) {
            (DecisionReason::Ok, _) => "Query allowed".into(),
            (DecisionReason::DeniedPattern, Some(rule)) => {
                format!("Query contains forbidden pattern: {}", rule)
            }
            (DecisionReason::DeniedPattern, None) => "Query contains forbidden pattern".into(),
            (DecisionReason::DeniedNotReadOnly, _) => {
                "Read-only mode: only SELECT, WITH, SHOW and DESCRIBE queries are allowed".into()
            }
            (DecisionReason::DeniedTooLong, _) => "Query exceeds maximum length".into(),
            (DecisionReason::DeniedTooManyStatements, _) => {
                "Query too complex: too many SELECT statements".into()
            }
            (DecisionReason::DeniedRateLimitedMinute, _) => {
                "Rate limit exceeded: too many queries this minute".into()
            }
            (DecisionReason::DeniedRateLimitedHour, _) => {
                "Rate limit exceeded: too many queries this hour".into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        let json = serde_json::to_string(&DecisionReason::Ok).unwrap();
        assert_eq!(json, "\"OK\"");
        let json = serde_json::to_string(&DecisionReason::DeniedRateLimitedMinute).unwrap();
        assert_eq!(json, "\"DENIED_RATE_LIMITED_MINUTE\"");

        for reason in [
            DecisionReason::Ok,
            DecisionReason::DeniedPattern,
            DecisionReason::DeniedNotReadOnly,
            DecisionReason::DeniedTooLong,
            DecisionReason::DeniedTooManyStatements,
            DecisionReason::DeniedRateLimitedMinute,
            DecisionReason::DeniedRateLimitedHour,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn test_decision_constructors() {
        let allowed = Decision::allow();
        assert!(allowed.is_allowed());
        assert_eq!(allowed.reason(), DecisionReason::Ok);

        let denied = Decision::deny_with_rule(DecisionReason::DeniedPattern, "mutating_keyword");
        assert!(!denied.is_allowed());
        assert_eq!(denied.matched_rule(), Some("mutating_keyword"));
        assert!(denied.message().contains("mutating_keyword"));
    }

    #[test]
    fn test_serialized_decision_omits_empty_rule() {
        let value = serde_json::to_value(Decision::allow()).unwrap();
        assert_eq!(value["allowed"], true);
        assert_eq!(value["reason"], "OK");
        assert!(value.get("matched_rule").is_none());
    }
}
