//! Error types for the gatekeeper.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `From` conversions.
//! Policy violations and rate denials are not errors: they surface as a
//! [`Decision`](crate::security::Decision) with a reason code.

use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the gatekeeper crate.
#[derive(Debug, Error)]
pub enum GatekeeperError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: Cow<'static, str>,
        message: Cow<'static, str>,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Audit sink errors. Never propagated past the recorder.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit sink unavailable: {0}")]
    SinkUnavailable(Cow<'static, str>),

    #[error("Audit write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("Audit IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failures reported by the database collaborator.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("No active database connection")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Query timeout after {0}ms")]
    Timeout(u64),
}

/// Tool execution errors.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

/// Result type alias for GatekeeperError.
pub type Result<T> = std::result::Result<T, GatekeeperError>;

/// Result type alias for ConfigError.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for AuditError.
pub type AuditResult<T> = std::result::Result<T, AuditError>;

/// Result type alias for ExecutionError.
pub type ExecResult<T> = std::result::Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let exec_error = ExecutionError::QueryFailed("boom".into());
        let error: GatekeeperError = exec_error.into();
        assert!(matches!(error, GatekeeperError::Execution(_)));

        let config_error = ConfigError::invalid("max_rows", "must be positive");
        let error: GatekeeperError = config_error.into();
        assert_eq!(
            error.to_string(),
            "Configuration error: Invalid value for max_rows: must be positive"
        );
    }

    #[test]
    fn test_tool_error_conversion() {
        let error: GatekeeperError = ToolError::NotFound("drop_table".into()).into();
        assert_eq!(error.to_string(), "Tool error: Tool not found: drop_table");
    }

    #[test]
    fn test_audit_timeout_display() {
        let error = AuditError::WriteTimeout(Duration::from_millis(50));
        assert!(error.to_string().contains("50ms"));
    }
}
