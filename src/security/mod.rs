//! Query firewall: pattern validation, shape limits and per-identity rate limiting.

pub mod decision;
pub mod limits;
pub mod query;
pub mod rate_limiter;
pub mod validator;

pub use decision::{Decision, DecisionReason};
pub use limits::{ExecutionLimits, LimitEnforcer, MAX_QUERY_TIMEOUT, MAX_ROWS_CEILING};
pub use query::{Identity, Query, count_read_statements};
pub use rate_limiter::{RateLimitStatus, RateLimiter, RateLimiterBuilder};
pub use validator::{DenyRule, SqlValidator};
