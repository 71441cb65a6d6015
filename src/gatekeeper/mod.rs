//! Query authorization.
//!
//! Every query attempt moves through `received -> validated -> rate checked`
//! and ends allowed or denied. Pattern and limit checks run first, so a
//! malformed query never consumes rate budget. Only an allowed attempt may
//! reach the database, and its outcome is reported back through
//! [`Gatekeeper::record_outcome`].
//!
//! Each call to [`Gatekeeper::authorize`] writes exactly one
//! `query_attempted` audit record. Each call to
//! [`Gatekeeper::record_outcome`] writes one `query_executed` record, or an
//! `outcome_rejected` record when the attempt is not awaiting an outcome.

use crate::audit::{
    AttemptId, AuditRecord, AuditRecorder, AuditSink, ExecutionDetails, MemoryAuditSink,
    OutcomeRejection,
};
use crate::config::{DatabaseTarget, GatekeeperConfig};
use crate::error::ConfigResult;
use crate::security::{
    Decision, ExecutionLimits, Identity, LimitEnforcer, Query, RateLimiter, SqlValidator,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pending attempts kept before stale entries are purged.
const PENDING_CAPACITY: usize = 4096;

/// Tracked identities above which idle rate windows are swept.
const IDENTITY_SWEEP_THRESHOLD: usize = 1024;

/// Minimum time between two sweeps of the same table.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Result of one authorization attempt.
#[derive(Debug, Clone, Serialize)]
pub struct Authorization {
    attempt_id: AttemptId,
    decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    limits: Option<ExecutionLimits>,
}

impl Authorization {
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    /// Row cap and timeout for the executor. Present only when allowed.
    pub fn limits(&self) -> Option<ExecutionLimits> {
        self.limits
    }

    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }

    pub fn into_decision(self) -> Decision {
        self.decision
    }
}

/// Outcome of an allowed query, as reported by the executing caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    pub succeeded: bool,
    pub row_count: Option<u64>,
    pub execution_time_seconds: Option<f64>,
    pub error: Option<String>,
}

impl QueryOutcome {
    pub fn success(row_count: u64, execution_time_seconds: f64) -> Self {
        Self {
            succeeded: true,
            row_count: Some(row_count),
            execution_time_seconds: Some(execution_time_seconds),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>, execution_time_seconds: Option<f64>) -> Self {
        Self {
            succeeded: false,
            row_count: None,
            execution_time_seconds,
            error: Some(error.into()),
        }
    }
}

impl From<QueryOutcome> for ExecutionDetails {
    fn from(outcome: QueryOutcome) -> Self {
        Self {
            succeeded: outcome.succeeded,
            row_count: outcome.row_count,
            execution_time_seconds: outcome.execution_time_seconds,
            error: outcome.error,
        }
    }
}

/// An allowed attempt awaiting its outcome.
struct PendingAttempt {
    identity: Identity,
    sql: String,
    authorized_at: Instant,
}

/// Orchestrates validation, limits, rate limiting and audit.
pub struct Gatekeeper {
    target: DatabaseTarget,
    validator: SqlValidator,
    limits: LimitEnforcer,
    rate_limiter: Arc<RateLimiter>,
    recorder: Arc<AuditRecorder>,
    pending: DashMap<AttemptId, PendingAttempt>,
    next_attempt: AtomicU64,
    last_identity_sweep: Mutex<Instant>,
    last_pending_sweep: Mutex<Instant>,
}

impl Gatekeeper {
    pub fn builder() -> GatekeeperBuilder {
        GatekeeperBuilder::new()
    }

    /// Authorize `sql` for `identity`.
    pub fn authorize(&self, sql: &str, identity: &Identity) -> Authorization {
        self.authorize_at(sql, identity, Instant::now())
    }

    pub(crate) fn authorize_at(&self, sql: &str, identity: &Identity, now: Instant) -> Authorization {
        let attempt_id = AttemptId(self.next_attempt.fetch_add(1, Ordering::SeqCst));
        let query = Query::new(sql);
        debug!(%attempt_id, identity = %identity, "Query received: {}", query.preview());

        let mut decision = self.evaluate_query(&query);
        if decision.is_allowed() {
            decision = self.rate_limiter.allow_at(identity, now);
            if self.rate_limiter.tracked_identities() > IDENTITY_SWEEP_THRESHOLD
                && sweep_due(&self.last_identity_sweep, now)
            {
                self.rate_limiter.purge_expired_at(now);
            }
        }

        self.recorder.record(AuditRecord::attempted(
            attempt_id,
            identity,
            &self.target,
            query.text(),
            &decision,
        ));

        if !decision.is_allowed() {
            warn!(
                %attempt_id,
                identity = %identity,
                reason = %decision.reason(),
                rule = decision.matched_rule().unwrap_or("-"),
                "Query denied"
            );
            return Authorization {
                attempt_id,
                decision,
                limits: None,
            };
        }

        let limits = self.limits.execution_limits();
        self.track_pending(
            attempt_id,
            PendingAttempt {
                identity: identity.clone(),
                sql: query.text().to_string(),
                authorized_at: now,
            },
        );
        debug!(%attempt_id, "Query allowed");

        Authorization {
            attempt_id,
            decision,
            limits: Some(limits),
        }
    }

    /// Pattern and limit verdict only. Consumes no rate budget and writes no
    /// audit record.
    pub fn evaluate(&self, sql: &str) -> Decision {
        self.evaluate_query(&Query::new(sql))
    }

    fn evaluate_query(&self, query: &Query) -> Decision {
        let decision = self.validator.validate(query);
        if !decision.is_allowed() {
            return decision;
        }
        self.limits.check_limits(query)
    }

    /// Record the outcome of an allowed attempt.
    ///
    /// Returns `false` when `attempt_id` is not awaiting an outcome: it was
    /// never issued, was denied, already has an outcome or was purged. Such
    /// reports are audited as `outcome_rejected` and never as an execution.
    pub fn record_outcome(&self, attempt_id: AttemptId, outcome: QueryOutcome) -> bool {
        let Some((_, pending)) = self.pending.remove(&attempt_id) else {
            self.reject_outcome(attempt_id, outcome);
            return false;
        };

        if outcome.succeeded {
            debug!(
                %attempt_id,
                rows = outcome.row_count,
                seconds = outcome.execution_time_seconds,
                "Query executed"
            );
        } else {
            warn!(
                %attempt_id,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Query execution failed"
            );
        }

        self.recorder.record(AuditRecord::executed(
            attempt_id,
            &pending.identity,
            &self.target,
            &pending.sql,
            outcome.into(),
        ));
        true
    }

    fn reject_outcome(&self, attempt_id: AttemptId, outcome: QueryOutcome) {
        // Ids are issued in increasing order from 1.
        let next = self.next_attempt.load(Ordering::SeqCst);
        let rejection = if attempt_id.0 == 0 || attempt_id.0 >= next {
            OutcomeRejection::NeverIssued
        } else {
            OutcomeRejection::NotPending
        };
        warn!(
            %attempt_id,
            rejection = ?rejection,
            "Outcome reported for an attempt that is not awaiting one"
        );
        self.recorder.record(AuditRecord::rejected(
            attempt_id,
            &self.target,
            rejection,
            outcome.into(),
        ));
    }

    fn track_pending(&self, attempt_id: AttemptId, pending: PendingAttempt) {
        let now = pending.authorized_at;
        self.pending.insert(attempt_id, pending);

        if self.pending.len() > PENDING_CAPACITY && sweep_due(&self.last_pending_sweep, now) {
            let max_age = self.limits.query_timeout() * 2;
            let before = self.pending.len();
            self.pending
                .retain(|_, p| now.saturating_duration_since(p.authorized_at) < max_age);
            let purged = before.saturating_sub(self.pending.len());
            if purged > 0 {
                warn!("Purged {} attempts that never reported an outcome", purged);
            }
        }
    }

    /// Attempt ids handed out so far, allowed or denied.
    pub fn attempts_issued(&self) -> u64 {
        self.next_attempt.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Allowed attempts still awaiting an outcome.
    pub fn pending_attempts(&self) -> usize {
        self.pending.len()
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn recorder(&self) -> &Arc<AuditRecorder> {
        &self.recorder
    }

    pub fn limits(&self) -> &LimitEnforcer {
        &self.limits
    }

    pub fn target(&self) -> &DatabaseTarget {
        &self.target
    }

    pub fn query_timeout(&self) -> Duration {
        self.limits.query_timeout()
    }
}

/// Claim the sweep slot if the last sweep is at least [`SWEEP_INTERVAL`] old.
/// A sweep already running elsewhere counts as not due.
fn sweep_due(last: &Mutex<Instant>, now: Instant) -> bool {
    let Some(mut last) = last.try_lock() else {
        return false;
    };
    if now.saturating_duration_since(*last) < SWEEP_INTERVAL {
        return false;
    }
    *last = now;
    true
}

/// Builder for [`Gatekeeper`].
pub struct GatekeeperBuilder {
    config: Option<GatekeeperConfig>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl GatekeeperBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            audit_sink: None,
            rate_limiter: None,
        }
    }

    pub fn config(mut self, config: GatekeeperConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this sink instead of the one described by the audit config.
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Share an existing rate limiter.
    pub fn rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn build(self) -> ConfigResult<Gatekeeper> {
        let config = self.config.unwrap_or_default();
        let limits = LimitEnforcer::new(&config.limits)?;
        let rate_limiter = self
            .rate_limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::from_config(&config.rate_limit)));
        let recorder = match self.audit_sink {
            Some(sink) => AuditRecorder::new(sink),
            None => AuditRecorder::from_config(&config.audit),
        };

        info!(
            project = %config.target.project_id,
            instance = %config.target.instance_id,
            database = %config.target.database_id,
            max_rows = limits.max_rows(),
            timeout_secs = limits.query_timeout().as_secs(),
            per_minute = rate_limiter.per_minute(),
            per_hour = rate_limiter.per_hour(),
            audit_sink = recorder.sink_name(),
            "Gatekeeper initialized"
        );

        let built_at = Instant::now();
        Ok(Gatekeeper {
            target: config.target,
            validator: SqlValidator::new(),
            limits,
            rate_limiter,
            recorder: Arc::new(recorder),
            pending: DashMap::new(),
            next_attempt: AtomicU64::new(1),
            last_identity_sweep: Mutex::new(built_at),
            last_pending_sweep: Mutex::new(built_at),
        })
    }

    /// Build with an in-memory audit sink, returning both.
    pub fn build_with_memory_audit(self) -> ConfigResult<(Gatekeeper, Arc<MemoryAuditSink>)> {
        let sink = Arc::new(MemoryAuditSink::new());
        let gatekeeper = self.audit_sink(sink.clone()).build()?;
        Ok((gatekeeper, sink))
    }
}

impl Default for GatekeeperBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditDetails, AuditOperation};
    use crate::config::GatekeeperConfigBuilder;
    use crate::security::DecisionReason;

    fn gatekeeper(per_minute: u32) -> (Gatekeeper, Arc<MemoryAuditSink>) {
        let config = GatekeeperConfigBuilder::new()
            .target(DatabaseTarget::new("proj", "inst", "db"))
            .rate_per_minute(per_minute)
            .build()
            .unwrap();
        Gatekeeper::builder()
            .config(config)
            .build_with_memory_audit()
            .unwrap()
    }

    fn alice() -> Identity {
        Identity::new("alice", "s1")
    }

    #[test]
    fn test_allowed_query_carries_limits() {
        let (gk, audit) = gatekeeper(60);
        let auth = gk.authorize("SELECT * FROM users LIMIT 10", &alice());
        assert!(auth.is_allowed());
        assert_eq!(auth.decision().reason(), DecisionReason::Ok);
        let limits = auth.limits().unwrap();
        assert_eq!(limits.max_rows, 1_000);
        assert_eq!(limits.timeout, Duration::from_secs(30));
        assert_eq!(gk.pending_attempts(), 1);
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn test_policy_denial_does_not_consume_rate_budget() {
        let (gk, _audit) = gatekeeper(1);
        let denied = gk.authorize("DELETE FROM users", &alice());
        assert_eq!(denied.decision().reason(), DecisionReason::DeniedPattern);
        assert!(denied.limits().is_none());
        assert!(gk.rate_limiter().status(&alice()).is_none());

        assert!(gk.authorize("SELECT 1", &alice()).is_allowed());
        assert_eq!(
            gk.authorize("SELECT 1", &alice()).decision().reason(),
            DecisionReason::DeniedRateLimitedMinute
        );
        assert_eq!(gk.pending_attempts(), 1);
    }

    #[test]
    fn test_authorization_is_read_only_view() {
        let (gk, _audit) = gatekeeper(60);
        let denied = gk.authorize("DROP TABLE users", &alice());
        let json = serde_json::to_value(&denied).unwrap();
        assert_eq!(json["attempt_id"], denied.attempt_id().0);
        assert!(json.get("limits").is_none());

        let allowed = gk.authorize("SELECT 1", &alice());
        assert_eq!(allowed.limits().map(|l| l.max_rows), Some(1_000));
        assert_eq!(allowed.clone().into_decision(), *allowed.decision());
    }

    #[test]
    fn test_attempt_ids_are_unique() {
        let (gk, _audit) = gatekeeper(60);
        let a = gk.authorize("SELECT 1", &alice()).attempt_id();
        let b = gk.authorize("DROP TABLE x", &alice()).attempt_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_outcome_correlates_with_attempt() {
        let (gk, audit) = gatekeeper(60);
        let auth = gk.authorize("SELECT name FROM users", &alice());
        gk.record_outcome(auth.attempt_id(), QueryOutcome::success(3, 0.012));

        let records = audit.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].operation, AuditOperation::QueryAttempted);
        assert_eq!(records[1].operation, AuditOperation::QueryExecuted);
        assert_eq!(records[0].attempt_id, records[1].attempt_id);
        assert_eq!(records[1].user_id, "alice");
        match &records[1].details {
            AuditDetails::Executed {
                sql,
                succeeded,
                row_count,
                ..
            } => {
                assert_eq!(sql, "SELECT name FROM users");
                assert!(*succeeded);
                assert_eq!(*row_count, Some(3));
            }
            other => panic!("unexpected details: {other:?}"),
        }
        assert_eq!(gk.pending_attempts(), 0);
    }

    #[test]
    fn test_failed_outcome_is_recorded() {
        let (gk, audit) = gatekeeper(60);
        let auth = gk.authorize("SELECT 1", &alice());
        gk.record_outcome(
            auth.attempt_id(),
            QueryOutcome::failure("Query timeout after 30000ms", Some(30.0)),
        );
        match &audit.records()[1].details {
            AuditDetails::Executed {
                succeeded, error, ..
            } => {
                assert!(!*succeeded);
                assert_eq!(error.as_deref(), Some("Query timeout after 30000ms"));
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }

    fn assert_rejected(record: &AuditRecord, expected: OutcomeRejection) {
        assert_eq!(record.operation, AuditOperation::OutcomeRejected);
        match &record.details {
            AuditDetails::Rejected { rejection, .. } => assert_eq!(*rejection, expected),
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[test]
    fn test_never_issued_attempt_is_rejected() {
        let (gk, audit) = gatekeeper(60);
        assert!(!gk.record_outcome(AttemptId(999), QueryOutcome::success(0, 0.0)));
        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_rejected(&records[0], OutcomeRejection::NeverIssued);
        assert_eq!(records[0].user_id, "unknown");
    }

    #[test]
    fn test_outcome_for_denied_attempt_is_rejected() {
        let (gk, audit) = gatekeeper(60);
        let denied = gk.authorize("DROP TABLE users", &alice());
        assert!(!denied.is_allowed());

        assert!(!gk.record_outcome(denied.attempt_id(), QueryOutcome::success(10, 0.1)));
        let records = audit.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].attempt_id, denied.attempt_id());
        assert_rejected(&records[1], OutcomeRejection::NotPending);
        assert!(
            records
                .iter()
                .all(|r| r.operation != AuditOperation::QueryExecuted)
        );
    }

    #[test]
    fn test_second_outcome_for_same_attempt_is_rejected() {
        let (gk, audit) = gatekeeper(60);
        let auth = gk.authorize("SELECT 1", &alice());
        assert!(gk.record_outcome(auth.attempt_id(), QueryOutcome::success(1, 0.01)));
        assert!(!gk.record_outcome(auth.attempt_id(), QueryOutcome::success(1, 0.01)));

        let records = audit.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].operation, AuditOperation::QueryExecuted);
        assert_rejected(&records[2], OutcomeRejection::NotPending);
        let executed = records
            .iter()
            .filter(|r| r.operation == AuditOperation::QueryExecuted)
            .count();
        assert_eq!(executed, 1);
    }

    #[test]
    fn test_evaluate_is_pure() {
        let (gk, audit) = gatekeeper(1);
        for _ in 0..5 {
            assert!(gk.evaluate("SELECT 1").is_allowed());
        }
        assert_eq!(
            gk.evaluate("UPDATE t SET a = 1").reason(),
            DecisionReason::DeniedPattern
        );
        assert!(audit.is_empty());
        assert!(gk.authorize("SELECT 1", &alice()).is_allowed());
    }

    #[test]
    fn test_rate_window_reset_through_gatekeeper() {
        let (gk, _audit) = gatekeeper(2);
        let start = Instant::now();
        assert!(gk.authorize_at("SELECT 1", &alice(), start).is_allowed());
        assert!(gk.authorize_at("SELECT 1", &alice(), start).is_allowed());
        assert!(!gk.authorize_at("SELECT 1", &alice(), start).is_allowed());
        assert!(
            gk.authorize_at("SELECT 1", &alice(), start + Duration::from_secs(60))
                .is_allowed()
        );
    }

    #[test]
    fn test_idle_identities_are_swept() {
        let (gk, _audit) = gatekeeper(60);
        let start = Instant::now();
        for i in 0..IDENTITY_SWEEP_THRESHOLD {
            gk.authorize_at("SELECT 1", &Identity::new(format!("user-{i}"), "s"), start);
        }
        assert_eq!(gk.rate_limiter().tracked_identities(), IDENTITY_SWEEP_THRESHOLD);

        let later = start + Duration::from_secs(3_600);
        gk.authorize_at("SELECT 1", &alice(), later);
        assert_eq!(gk.rate_limiter().tracked_identities(), 1);
    }

    #[test]
    fn test_identity_sweep_runs_at_most_once_per_minute() {
        let (gk, _audit) = gatekeeper(60);
        let start = Instant::now();
        let fill = |prefix: &str| {
            for i in 0..=IDENTITY_SWEEP_THRESHOLD {
                gk.authorize_at("SELECT 1", &Identity::new(format!("{prefix}-{i}"), "s"), start);
            }
        };

        // First crossing right after build: the last sweep is too recent.
        fill("a");
        assert_eq!(gk.rate_limiter().tracked_identities(), IDENTITY_SWEEP_THRESHOLD + 1);

        let swept_at = start + Duration::from_secs(3_600);
        gk.authorize_at("SELECT 1", &alice(), swept_at);
        assert_eq!(gk.rate_limiter().tracked_identities(), 1);

        // Idle again by the next call, but the previous sweep was 30s ago.
        fill("b");
        gk.authorize_at("SELECT 1", &Identity::new("carol", "s"), swept_at + Duration::from_secs(30));
        assert_eq!(gk.rate_limiter().tracked_identities(), IDENTITY_SWEEP_THRESHOLD + 3);

        gk.authorize_at("SELECT 1", &Identity::new("dave", "s"), swept_at + SWEEP_INTERVAL);
        assert_eq!(gk.rate_limiter().tracked_identities(), 3);
    }

    #[test]
    fn test_sweep_slot_is_claimed_once() {
        let start = Instant::now();
        let slot = Mutex::new(start);
        assert!(!sweep_due(&slot, start + Duration::from_secs(59)));
        assert!(sweep_due(&slot, start + SWEEP_INTERVAL));
        assert!(!sweep_due(&slot, start + SWEEP_INTERVAL));

        let _held = slot.lock();
        assert!(!sweep_due(&slot, start + Duration::from_secs(3_600)));
    }

    #[test]
    fn test_stale_pending_attempts_are_purged() {
        let config = GatekeeperConfigBuilder::new()
            .rate_per_minute(100_000)
            .rate_per_hour(100_000)
            .build()
            .unwrap();
        let (gk, _audit) = Gatekeeper::builder()
            .config(config)
            .build_with_memory_audit()
            .unwrap();
        let start = Instant::now();
        for _ in 0..PENDING_CAPACITY {
            gk.authorize_at("SELECT 1", &alice(), start);
        }
        assert_eq!(gk.pending_attempts(), PENDING_CAPACITY);

        let later = start + Duration::from_secs(61);
        gk.authorize_at("SELECT 1", &Identity::new("bob", "s1"), later);
        assert_eq!(gk.pending_attempts(), 1);

        // Over capacity again, but the table was swept under a minute ago.
        for _ in 0..PENDING_CAPACITY {
            gk.authorize_at("SELECT 1", &alice(), later);
        }
        gk.authorize_at("SELECT 1", &alice(), later + Duration::from_secs(59));
        assert_eq!(gk.pending_attempts(), PENDING_CAPACITY + 2);
    }
}
