//! Configuration types and builders.
//!
//! Thresholds are read once at startup and handed to component constructors.
//! Nothing outside [`GatekeeperConfigBuilder::from_env`] touches the process
//! environment.

use crate::error::{ConfigError, ConfigResult};
use crate::security::{Identity, LimitEnforcer};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Identifiers of the managed database, stamped into every audit record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseTarget {
    pub project_id: String,
    pub instance_id: String,
    pub database_id: String,
}

impl DatabaseTarget {
    pub fn new(
        project_id: impl Into<String>,
        instance_id: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            instance_id: instance_id.into(),
            database_id: database_id.into(),
        }
    }
}

/// Query shape limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_query_length: usize,
    pub max_select_statements: usize,
    pub max_rows: usize,
    pub query_timeout: Duration,
    /// Ceiling on executions in flight at once, enforced by the tool layer.
    pub max_concurrent_queries: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_query_length: 10_000,
            max_select_statements: 3,
            max_rows: 1_000,
            query_timeout: Duration::from_secs(30),
            max_concurrent_queries: 10,
        }
    }
}

/// Per-identity request thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub per_minute: u32,
    pub per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1_000,
        }
    }
}

/// Audit sink selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// JSON-lines file to append to. `None` routes records to the log stream.
    pub log_path: Option<PathBuf>,
    /// Lines queued ahead of the file writer. Records beyond this fall back
    /// to the log stream.
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            queue_capacity: 1_024,
        }
    }
}

/// Identity the operator CLI acts under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub user_id: String,
    pub session_id: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            user_id: "cli".to_string(),
            session_id: "cli".to_string(),
        }
    }
}

impl OperatorConfig {
    pub fn identity(&self) -> Identity {
        Identity::new(self.user_id.clone(), self.session_id.clone())
    }
}

/// Complete gatekeeper configuration. Immutable once built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    pub target: DatabaseTarget,
    pub limits: LimitsConfig,
    pub rate_limit: RateLimitConfig,
    pub audit: AuditConfig,
    pub operator: OperatorConfig,
}

impl GatekeeperConfig {
    pub fn builder() -> GatekeeperConfigBuilder {
        GatekeeperConfigBuilder::default()
    }
}

/// Builder for GatekeeperConfig with fluent API.
#[derive(Default)]
pub struct GatekeeperConfigBuilder {
    config: GatekeeperConfig,
}

impl GatekeeperConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(mut self, target: DatabaseTarget) -> Self {
        self.config.target = target;
        self
    }

    pub fn max_query_length(mut self, length: usize) -> Self {
        self.config.limits.max_query_length = length;
        self
    }

    pub fn max_select_statements(mut self, count: usize) -> Self {
        self.config.limits.max_select_statements = count;
        self
    }

    pub fn max_rows(mut self, rows: usize) -> Self {
        self.config.limits.max_rows = rows;
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.config.limits.query_timeout = timeout;
        self
    }

    pub fn max_concurrent_queries(mut self, count: usize) -> Self {
        self.config.limits.max_concurrent_queries = count;
        self
    }

    pub fn rate_per_minute(mut self, limit: u32) -> Self {
        self.config.rate_limit.per_minute = limit;
        self
    }

    pub fn rate_per_hour(mut self, limit: u32) -> Self {
        self.config.rate_limit.per_hour = limit;
        self
    }

    pub fn audit_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.audit.log_path = Some(path.into());
        self
    }

    pub fn audit_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.audit.queue_capacity = capacity;
        self
    }

    pub fn operator(mut self, user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        self.config.operator = OperatorConfig {
            user_id: user_id.into(),
            session_id: session_id.into(),
        };
        self
    }

    /// Overlay values from environment variables.
    pub fn from_env(mut self) -> ConfigResult<Self> {
        if let Ok(project) = env::var("SPANNER_PROJECT") {
            self.config.target.project_id = project;
        }

        if let Ok(instance) = env::var("SPANNER_INSTANCE") {
            self.config.target.instance_id = instance;
        }

        if let Ok(database) = env::var("SPANNER_DATABASE") {
            self.config.target.database_id = database;
        }

        if let Some(length) = parse_env("GATEKEEPER_MAX_QUERY_LENGTH")? {
            self.config.limits.max_query_length = length;
        }

        if let Some(count) = parse_env("GATEKEEPER_MAX_SELECT_STATEMENTS")? {
            self.config.limits.max_select_statements = count;
        }

        if let Some(rows) = parse_env("SPANNER_MAX_ROWS")? {
            self.config.limits.max_rows = rows;
        }

        if let Some(secs) = parse_env::<u64>("SPANNER_QUERY_TIMEOUT")? {
            self.config.limits.query_timeout = Duration::from_secs(secs);
        }

        if let Some(count) = parse_env("GATEKEEPER_MAX_CONCURRENT_QUERIES")? {
            self.config.limits.max_concurrent_queries = count;
        }

        if let Some(limit) = parse_env("GATEKEEPER_RATE_PER_MINUTE")? {
            self.config.rate_limit.per_minute = limit;
        }

        if let Some(limit) = parse_env("GATEKEEPER_RATE_PER_HOUR")? {
            self.config.rate_limit.per_hour = limit;
        }

        if let Ok(path) = env::var("AUDIT_LOG_PATH") {
            if !path.trim().is_empty() {
                self.config.audit.log_path = Some(PathBuf::from(path));
            }
        }

        if let Some(capacity) = parse_env("AUDIT_QUEUE_CAPACITY")? {
            self.config.audit.queue_capacity = capacity;
        }

        if let Some(user_id) = non_blank_env("GATEKEEPER_USER_ID") {
            self.config.operator.user_id = user_id;
        }

        if let Some(session_id) = non_blank_env("GATEKEEPER_SESSION_ID") {
            self.config.operator.session_id = session_id;
        }

        Ok(self)
    }

    pub fn build(self) -> ConfigResult<GatekeeperConfig> {
        self.validate()?;
        Ok(self.config)
    }

    fn validate(&self) -> ConfigResult<()> {
        LimitEnforcer::new(&self.config.limits)?;

        if self.config.limits.max_concurrent_queries == 0 {
            return Err(ConfigError::invalid(
                "limits.max_concurrent_queries",
                "Concurrent query limit must be greater than 0",
            ));
        }

        let rate = &self.config.rate_limit;
        if rate.per_minute == 0 {
            return Err(ConfigError::invalid(
                "rate_limit.per_minute",
                "Rate limit must be greater than 0",
            ));
        }
        if rate.per_hour < rate.per_minute {
            return Err(ConfigError::invalid(
                "rate_limit.per_hour",
                "Hourly limit must not be lower than the per-minute limit",
            ));
        }

        if self.config.audit.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "audit.queue_capacity",
                "Audit queue capacity must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Parse an optional environment variable; present-but-malformed is an error.
fn parse_env<T: FromStr>(key: &'static str) -> ConfigResult<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            field: Cow::Borrowed(key),
            message: format!("Cannot parse '{}' as a non-negative integer", raw).into(),
        }),
        Err(_) => Ok(None),
    }
}

fn non_blank_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Serializes tests that mutate the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Run `f` with `vars` set, removing them afterwards.
    fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock();
        for (key, value) in vars {
            // SAFETY: ENV_LOCK serializes every environment access in these tests.
            unsafe { env::set_var(key, value) };
        }
        let result = f();
        for (key, _) in vars {
            // SAFETY: as above.
            unsafe { env::remove_var(key) };
        }
        result
    }

    #[test]
    fn test_defaults() {
        let config = GatekeeperConfig::builder().build().unwrap();
        assert_eq!(config.limits.max_query_length, 10_000);
        assert_eq!(config.limits.max_select_statements, 3);
        assert_eq!(config.limits.max_rows, 1_000);
        assert_eq!(config.limits.query_timeout, Duration::from_secs(30));
        assert_eq!(config.limits.max_concurrent_queries, 10);
        assert_eq!(config.rate_limit.per_minute, 60);
        assert_eq!(config.rate_limit.per_hour, 1_000);
        assert!(config.audit.log_path.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = GatekeeperConfigBuilder::new()
            .target(DatabaseTarget::new("proj", "inst", "db"))
            .max_rows(250)
            .query_timeout(Duration::from_secs(5))
            .rate_per_minute(10)
            .rate_per_hour(100)
            .build()
            .unwrap();

        assert_eq!(config.target.instance_id, "inst");
        assert_eq!(config.limits.max_rows, 250);
        assert_eq!(config.rate_limit.per_minute, 10);
    }

    #[test]
    fn test_rejects_out_of_range_limits() {
        assert!(GatekeeperConfigBuilder::new().max_rows(0).build().is_err());
        assert!(
            GatekeeperConfigBuilder::new()
                .max_concurrent_queries(0)
                .build()
                .is_err()
        );
        assert!(
            GatekeeperConfigBuilder::new()
                .max_rows(10_000_000)
                .build()
                .is_err()
        );
        assert!(
            GatekeeperConfigBuilder::new()
                .query_timeout(Duration::ZERO)
                .build()
                .is_err()
        );
        assert!(
            GatekeeperConfigBuilder::new()
                .query_timeout(Duration::from_secs(3_600))
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_rejects_inconsistent_rate_limits() {
        let result = GatekeeperConfigBuilder::new()
            .rate_per_minute(100)
            .rate_per_hour(10)
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        assert!(GatekeeperConfigBuilder::new().rate_per_minute(0).build().is_err());
    }

    #[test]
    fn test_rejects_zero_audit_queue() {
        let result = GatekeeperConfigBuilder::new().audit_queue_capacity(0).build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "audit.queue_capacity"
        ));
    }

    #[test]
    fn test_from_env_rejects_malformed_number() {
        let result = with_env(&[("SPANNER_MAX_ROWS", "abc")], || {
            GatekeeperConfigBuilder::new().from_env()
        });
        match result {
            Err(ConfigError::InvalidValue { field, message }) => {
                assert_eq!(field, "SPANNER_MAX_ROWS");
                assert!(message.contains("abc"));
            }
            Ok(_) => panic!("malformed SPANNER_MAX_ROWS was accepted"),
        }
    }

    #[test]
    fn test_from_env_overlays_values() {
        let config = with_env(
            &[
                ("GATEKEEPER_RATE_PER_MINUTE", " 5 "),
                ("SPANNER_DATABASE", "warehouse"),
                ("AUDIT_QUEUE_CAPACITY", "16"),
                ("GATEKEEPER_USER_ID", "ops"),
                ("GATEKEEPER_SESSION_ID", "  "),
            ],
            || GatekeeperConfigBuilder::new().from_env()?.build(),
        )
        .unwrap();

        assert_eq!(config.rate_limit.per_minute, 5);
        assert_eq!(config.rate_limit.per_hour, 1_000);
        assert_eq!(config.target.database_id, "warehouse");
        assert_eq!(config.audit.queue_capacity, 16);
        assert_eq!(config.operator.identity(), Identity::new("ops", "cli"));
    }

    #[test]
    fn test_from_env_values_still_validated() {
        let result = with_env(&[("GATEKEEPER_RATE_PER_MINUTE", "0")], || {
            GatekeeperConfigBuilder::new().from_env()?.build()
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "rate_limit.per_minute"
        ));
    }
}
