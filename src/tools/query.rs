//! Guarded query execution tool.

use crate::audit::AttemptId;
use crate::database::{QueryExecutor, QueryOptions, QueryResult, Row};
use crate::error::{ExecutionError, Result, ToolError};
use crate::gatekeeper::{Gatekeeper, QueryOutcome};
use crate::protocol::{CallToolResult, Tool};
use crate::security::{DecisionReason, Identity};
use crate::tools::registry::ToolHandler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

/// Default ceiling for concurrent in-flight executions.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

fn default_identity_part() -> String {
    "default".into()
}

#[derive(Debug, Deserialize)]
pub struct RunQueryArgs {
    #[serde(alias = "query")]
    pub sql: String,
    #[serde(default = "default_identity_part")]
    pub user_id: String,
    #[serde(default = "default_identity_part")]
    pub session_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Caps in-flight executions.
struct InFlight {
    current: AtomicUsize,
    max: usize,
}

impl InFlight {
    fn try_acquire(&self) -> Option<InFlightGuard<'_>> {
        self.current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|_| InFlightGuard { inner: self })
    }
}

/// RAII guard that releases the in-flight slot on drop.
struct InFlightGuard<'a> {
    inner: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.inner.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// `run_query`: authorize, execute under limits, report the outcome.
pub struct RunQueryTool {
    gatekeeper: Arc<Gatekeeper>,
    executor: Arc<dyn QueryExecutor>,
    in_flight: InFlight,
}

impl RunQueryTool {
    pub fn new(gatekeeper: Arc<Gatekeeper>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            gatekeeper,
            executor,
            in_flight: InFlight {
                current: AtomicUsize::new(0),
                max: DEFAULT_MAX_CONCURRENT,
            },
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.in_flight.max = max.max(1);
        self
    }

    pub fn gatekeeper(&self) -> &Arc<Gatekeeper> {
        &self.gatekeeper
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.current.load(Ordering::SeqCst)
    }

    /// Run `sql` for `identity`. Denials and failures come back as
    /// `success = false` rather than as errors.
    pub async fn run(&self, sql: &str, identity: &Identity, limit: Option<usize>) -> RunQueryOutput {
        let auth = self.gatekeeper.authorize(sql, identity);
        let output = RunQueryOutput::new(auth.attempt_id(), sql, identity);

        let Some(limits) = auth.limits() else {
            return output.denied(auth.decision().reason(), auth.decision().message());
        };
        let limits = limits.with_requested_rows(limit);

        let Some(_slot) = self.in_flight.try_acquire() else {
            let err = format!(
                "Concurrent query limit exceeded: {} in flight",
                self.in_flight.max
            );
            warn!(attempt_id = %auth.attempt_id(), "{}", err);
            self.gatekeeper
                .record_outcome(auth.attempt_id(), QueryOutcome::failure(err.clone(), None));
            return output.failed(err, 0.0);
        };

        debug!(
            attempt_id = %auth.attempt_id(),
            executor = self.executor.name(),
            "Executing query with limit {} and timeout {:?}",
            limits.max_rows,
            limits.timeout
        );

        let options = QueryOptions::from(limits);
        let started = Instant::now();
        let result = match tokio::time::timeout(limits.timeout, self.executor.execute(sql, &options))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout(limits.timeout.as_millis() as u64)),
        };
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(result) => {
                let result = result.truncate_to(limits.max_rows);
                self.gatekeeper.record_outcome(
                    auth.attempt_id(),
                    QueryOutcome::success(result.row_count as u64, elapsed),
                );
                output.succeeded(result, elapsed)
            }
            Err(e) => {
                let message = format!("Query execution failed: {}", e);
                error!(attempt_id = %auth.attempt_id(), "{}", message);
                self.gatekeeper.record_outcome(
                    auth.attempt_id(),
                    QueryOutcome::failure(e.to_string(), Some(elapsed)),
                );
                output.failed(message, elapsed)
            }
        }
    }
}

#[async_trait]
impl ToolHandler for RunQueryTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "run_query".into(),
            description: Some(
                "Execute a read-only SQL query against the configured database. \
                Only SELECT, WITH, SHOW and DESCRIBE statements are accepted; \
                comments, statement separators and data-modifying keywords are rejected. \
                Results are capped by the server's row limit, which the 'limit' \
                parameter can lower but never raise. Every call is audited."
                    .into(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "sql": {
                        "type": "string",
                        "description": "A read-only SQL statement, e.g. SELECT * FROM users WHERE active = true LIMIT 10"
                    },
                    "user_id": {
                        "type": "string",
                        "description": "User identifier for rate limiting and audit (default: 'default')"
                    },
                    "session_id": {
                        "type": "string",
                        "description": "Session identifier for rate limiting and audit (default: 'default')"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of rows to return; capped by the server limit",
                        "minimum": 1
                    }
                },
                "required": ["sql"]
            }),
        }
    }

    #[instrument(skip(self, arguments), fields(tool = "run_query"))]
    async fn execute(&self, arguments: Value) -> Result<CallToolResult> {
        let args: RunQueryArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let identity = Identity::new(args.user_id, args.session_id);
        let output = self.run(&args.sql, &identity, args.limit).await;

        if output.success {
            Ok(CallToolResult::json(&output))
        } else {
            Ok(CallToolResult::json_error(&output))
        }
    }
}

/// `run_query` response body.
#[derive(Debug, Clone, Serialize)]
pub struct RunQueryOutput {
    pub success: bool,
    pub attempt_id: AttemptId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DecisionReason>,
    pub columns: Vec<String>,
    pub data: Vec<Row>,
    pub row_count: usize,
    pub execution_time: f64,
    pub truncated: bool,
    pub sql: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunQueryOutput {
    fn new(attempt_id: AttemptId, sql: &str, identity: &Identity) -> Self {
        Self {
            success: false,
            attempt_id,
            reason: None,
            columns: vec![],
            data: vec![],
            row_count: 0,
            execution_time: 0.0,
            truncated: false,
            sql: sql.to_string(),
            timestamp: Utc::now(),
            user_id: identity.user_id.clone(),
            session_id: identity.session_id.clone(),
            error: None,
        }
    }

    fn denied(mut self, reason: DecisionReason, message: String) -> Self {
        self.reason = Some(reason);
        self.error = Some(format!("Query rejected for security reasons: {}", message));
        self
    }

    fn failed(mut self, message: String, elapsed: f64) -> Self {
        self.reason = Some(DecisionReason::Ok);
        self.execution_time = elapsed;
        self.error = Some(message);
        self
    }

    fn succeeded(mut self, result: QueryResult, elapsed: f64) -> Self {
        self.success = true;
        self.reason = Some(DecisionReason::Ok);
        self.truncated = result.is_truncated();
        self.columns = result.column_names();
        self.row_count = result.row_count;
        self.data = result.rows;
        self.execution_time = elapsed;
        self
    }
}
