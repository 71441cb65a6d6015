//! Audit record schema.

use crate::config::DatabaseTarget;
use crate::security::{Decision, DecisionReason, Identity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlates a `query_attempted` record with its `query_executed` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    QueryAttempted,
    QueryExecuted,
    /// An outcome was reported for an attempt that was not awaiting one.
    OutcomeRejected,
}

/// Why a reported outcome was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeRejection {
    /// The id was never handed out by this gatekeeper.
    NeverIssued,
    /// Denied, already reported, or purged after going stale.
    NotPending,
}

/// Operation-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditDetails {
    Attempted {
        sql: String,
        allowed: bool,
        reason: DecisionReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        matched_rule: Option<String>,
    },
    Executed {
        sql: String,
        succeeded: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        row_count: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        execution_time_seconds: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Rejected {
        rejection: OutcomeRejection,
        reported_succeeded: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reported_row_count: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reported_error: Option<String>,
    },
}

/// One append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub attempt_id: AttemptId,
    pub operation: AuditOperation,
    pub user_id: String,
    pub session_id: String,
    #[serde(flatten)]
    pub target: DatabaseTarget,
    pub details: AuditDetails,
}

impl AuditRecord {
    /// Record for an authorization decision.
    pub fn attempted(
        attempt_id: AttemptId,
        identity: &Identity,
        target: &DatabaseTarget,
        sql: &str,
        decision: &Decision,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            attempt_id,
            operation: AuditOperation::QueryAttempted,
            user_id: identity.user_id.clone(),
            session_id: identity.session_id.clone(),
            target: target.clone(),
            details: AuditDetails::Attempted {
                sql: sql.to_string(),
                allowed: decision.is_allowed(),
                reason: decision.reason(),
                matched_rule: decision.matched_rule().map(str::to_string),
            },
        }
    }

    /// Record for a completed (or failed) execution.
    pub fn executed(
        attempt_id: AttemptId,
        identity: &Identity,
        target: &DatabaseTarget,
        sql: &str,
        details: ExecutionDetails,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            attempt_id,
            operation: AuditOperation::QueryExecuted,
            user_id: identity.user_id.clone(),
            session_id: identity.session_id.clone(),
            target: target.clone(),
            details: AuditDetails::Executed {
                sql: sql.to_string(),
                succeeded: details.succeeded,
                row_count: details.row_count,
                execution_time_seconds: details.execution_time_seconds,
                error: details.error,
            },
        }
    }

    /// Record for an outcome that no pending attempt matched. The subject is
    /// unknown because nothing ties the report to an identity.
    pub fn rejected(
        attempt_id: AttemptId,
        target: &DatabaseTarget,
        rejection: OutcomeRejection,
        reported: ExecutionDetails,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            attempt_id,
            operation: AuditOperation::OutcomeRejected,
            user_id: "unknown".to_string(),
            session_id: "unknown".to_string(),
            target: target.clone(),
            details: AuditDetails::Rejected {
                rejection,
                reported_succeeded: reported.succeeded,
                reported_row_count: reported.row_count,
                reported_error: reported.error,
            },
        }
    }

    pub fn allowed(&self) -> Option<bool> {
        match &self.details {
            AuditDetails::Attempted { allowed, .. } => Some(*allowed),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<DecisionReason> {
        match &self.details {
            AuditDetails::Attempted { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Execution outcome fields carried into a `query_executed` record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionDetails {
    pub succeeded: bool,
    pub row_count: Option<u64>,
    pub execution_time_seconds: Option<f64>,
    pub error: Option<String>,
}
