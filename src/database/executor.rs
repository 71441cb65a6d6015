//! Database executor trait.

use crate::database::result::QueryResult;
use crate::error::ExecResult;
use crate::security::ExecutionLimits;
use async_trait::async_trait;
use std::time::Duration;

/// Outbound database collaborator.
///
/// Receives only queries the gatekeeper has allowed. Implementations own
/// connection handling and may honour `options` natively; callers still
/// enforce the timeout and row cap on their side. The gatekeeper never
/// retries on an executor's behalf.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Returns the executor name (e.g., "spanner").
    fn name(&self) -> &'static str;

    /// Executes a read-only SQL query.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::QueryFailed`](crate::error::ExecutionError::QueryFailed)
    /// if the database rejects the query, or
    /// [`ExecutionError::NotConnected`](crate::error::ExecutionError::NotConnected)
    /// if there is no session.
    async fn execute(&self, sql: &str, options: &QueryOptions) -> ExecResult<QueryResult>;
}

/// Query options for customizing query execution.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub limit: Option<usize>,
    pub timeout: Option<Duration>,
    pub read_only: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

impl From<ExecutionLimits> for QueryOptions {
    fn from(limits: ExecutionLimits) -> Self {
        Self::new()
            .with_limit(limits.max_rows)
            .with_timeout(limits.timeout)
            .read_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_options_builder() {
        let options = QueryOptions::new()
            .with_limit(100)
            .with_timeout(Duration::from_secs(30))
            .read_only();

        assert_eq!(options.limit, Some(100));
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert!(options.read_only);
    }

    #[test]
    fn test_options_from_execution_limits() {
        let options = QueryOptions::from(ExecutionLimits {
            max_rows: 50,
            timeout: Duration::from_secs(5),
        });
        assert_eq!(options.limit, Some(50));
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
        assert!(options.read_only);
    }
}
