//! Database health check tool.

use crate::audit::AttemptId;
use crate::error::Result;
use crate::protocol::{CallToolResult, Tool};
use crate::security::{DecisionReason, Identity};
use crate::tools::query::RunQueryTool;
use crate::tools::registry::ToolHandler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Statement used to test the connection.
pub const HEALTH_CHECK_SQL: &str = "SELECT 1 AS health_check";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    /// The check was denied before reaching the database.
    NotTested,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub status: ConnectionState,
    pub tested_at: DateTime<Utc>,
    pub response_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityReport {
    pub total_attempts: u64,
    pub pending_attempts: usize,
    pub in_flight: usize,
    pub audit_records: u64,
    pub audit_fallbacks: u64,
}

/// `get_database_health` response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub project_id: String,
    pub instance_id: String,
    pub database_id: String,
    pub attempt_id: AttemptId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DecisionReason>,
    pub connection: ConnectionReport,
    pub activity: ActivityReport,
}

/// `get_database_health`: run a trivial query through the same
/// authorization, execution and audit path as `run_query`.
pub struct HealthCheckTool {
    runner: Arc<RunQueryTool>,
}

impl HealthCheckTool {
    pub fn new(runner: Arc<RunQueryTool>) -> Self {
        Self { runner }
    }

    /// Identity health checks are charged and audited under.
    pub fn identity() -> Identity {
        Identity::new("system", "health_check")
    }

    pub async fn check(&self) -> HealthReport {
        let tested_at = Utc::now();
        let output = self.runner.run(HEALTH_CHECK_SQL, &Self::identity(), Some(1)).await;

        let connection = match output.reason {
            Some(DecisionReason::Ok) if output.success => ConnectionState::Connected,
            Some(DecisionReason::Ok) => ConnectionState::Disconnected,
            _ => ConnectionState::NotTested,
        };
        let status = if output.success {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        let gatekeeper = self.runner.gatekeeper();
        let target = gatekeeper.target();
        let recorder = gatekeeper.recorder();

        HealthReport {
            status,
            timestamp: Utc::now(),
            project_id: target.project_id.clone(),
            instance_id: target.instance_id.clone(),
            database_id: target.database_id.clone(),
            attempt_id: output.attempt_id,
            reason: output.reason,
            connection: ConnectionReport {
                status: connection,
                tested_at,
                response_time: output.execution_time,
                error: output.error,
            },
            activity: ActivityReport {
                total_attempts: gatekeeper.attempts_issued(),
                pending_attempts: gatekeeper.pending_attempts(),
                in_flight: self.runner.in_flight(),
                audit_records: recorder.records_written(),
                audit_fallbacks: recorder.fallback_count(),
            },
        }
    }
}

#[async_trait]
impl ToolHandler for HealthCheckTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get_database_health".into(),
            description: Some(
                "Check connectivity to the configured database by running a trivial \
                read-only query through the same security checks as run_query."
                    .into(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    #[instrument(skip(self, _arguments), fields(tool = "get_database_health"))]
    async fn execute(&self, _arguments: Value) -> Result<CallToolResult> {
        let report = self.check().await;
        match report.status {
            HealthStatus::Healthy => info!(attempt_id = %report.attempt_id, "Database healthy"),
            HealthStatus::Unhealthy => warn!(
                attempt_id = %report.attempt_id,
                connection = ?report.connection.status,
                "Database unhealthy"
            ),
        }
        Ok(CallToolResult::json(&report))
    }
}
