//! Query shape limits.
//!
//! Length and statement-count checks reject outright. The row cap and timeout
//! are not rejection criteria: they are validated here and handed to the
//! executing collaborator as [`ExecutionLimits`].

use crate::config::LimitsConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::security::decision::{Decision, DecisionReason};
use crate::security::query::Query;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// Absolute ceiling for the configured row cap.
pub const MAX_ROWS_CEILING: usize = 100_000;

/// Absolute ceiling for the configured query timeout.
pub const MAX_QUERY_TIMEOUT: Duration = Duration::from_secs(600);

/// Row cap and timeout for one allowed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionLimits {
    pub max_rows: usize,
    pub timeout: Duration,
}

impl ExecutionLimits {
    /// Narrow the row cap to a caller-requested limit; never widens it.
    pub fn with_requested_rows(mut self, requested: Option<usize>) -> Self {
        if let Some(rows) = requested.filter(|r| *r > 0) {
            self.max_rows = self.max_rows.min(rows);
        }
        self
    }
}

/// Enforces length and statement-count limits.
#[derive(Debug, Clone)]
pub struct LimitEnforcer {
    max_query_length: usize,
    max_select_statements: usize,
    max_rows: usize,
    query_timeout: Duration,
}

impl Default for LimitEnforcer {
    fn default() -> Self {
        let defaults = LimitsConfig::default();
        Self {
            max_query_length: defaults.max_query_length,
            max_select_statements: defaults.max_select_statements,
            max_rows: defaults.max_rows,
            query_timeout: defaults.query_timeout,
        }
    }
}

impl LimitEnforcer {
    /// Build from configuration, rejecting out-of-range values.
    pub fn new(config: &LimitsConfig) -> ConfigResult<Self> {
        if config.max_query_length == 0 {
            return Err(ConfigError::invalid(
                "limits.max_query_length",
                "Maximum query length must be greater than 0",
            ));
        }
        if config.max_select_statements == 0 {
            return Err(ConfigError::invalid(
                "limits.max_select_statements",
                "Maximum statement count must be greater than 0",
            ));
        }
        if config.max_rows == 0 || config.max_rows > MAX_ROWS_CEILING {
            return Err(ConfigError::invalid(
                "limits.max_rows",
                format!("Row cap must be between 1 and {}", MAX_ROWS_CEILING),
            ));
        }
        if config.query_timeout.is_zero() || config.query_timeout > MAX_QUERY_TIMEOUT {
            return Err(ConfigError::invalid(
                "limits.query_timeout",
                format!(
                    "Query timeout must be positive and at most {}s",
                    MAX_QUERY_TIMEOUT.as_secs()
                ),
            ));
        }

        Ok(Self {
            max_query_length: config.max_query_length,
            max_select_statements: config.max_select_statements,
            max_rows: config.max_rows,
            query_timeout: config.query_timeout,
        })
    }

    pub fn check_limits(&self, query: &Query) -> Decision {
        if query.len() > self.max_query_length {
            warn!(
                length = query.len(),
                max = self.max_query_length,
                "Query exceeds maximum length"
            );
            return Decision::deny(DecisionReason::DeniedTooLong);
        }

        if query.statement_count() > self.max_select_statements {
            warn!(
                statements = query.statement_count(),
                max = self.max_select_statements,
                "Query has too many statements"
            );
            return Decision::deny(DecisionReason::DeniedTooManyStatements);
        }

        Decision::allow()
    }

    pub fn execution_limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            max_rows: self.max_rows,
            timeout: self.query_timeout,
        }
    }

    pub fn max_query_length(&self) -> usize {
        self.max_query_length
    }

    pub fn max_select_statements(&self) -> usize {
        self.max_select_statements
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }
}
