//! Security gatekeeper for agent-issued database queries.
//!
//! Every query an agent wants to run passes through [`Gatekeeper::authorize`]:
//! pattern validation, shape limits, then a per-identity rate check. Allowed
//! queries carry a row cap and timeout for the executor, and every decision
//! and outcome is written to the audit trail.
//!
//! # Example
//!
//! ```no_run
//! use query_gatekeeper::{
//!     Gatekeeper, QueryOutcome,
//!     config::GatekeeperConfigBuilder,
//!     security::Identity,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = GatekeeperConfigBuilder::new().from_env()?.build()?;
//!     let gatekeeper = Gatekeeper::builder().config(config).build()?;
//!
//!     let identity = Identity::new("analyst", "session-1");
//!     let auth = gatekeeper.authorize("SELECT id, name FROM users LIMIT 10", &identity);
//!
//!     if let Some(limits) = auth.limits() {
//!         // Run the query with at most `limits.max_rows` rows within `limits.timeout`.
//!         let _ = limits;
//!         gatekeeper.record_outcome(auth.attempt_id(), QueryOutcome::success(10, 0.02));
//!     }
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod database;
pub mod error;
pub mod gatekeeper;
pub mod protocol;
pub mod security;
pub mod tools;

pub use audit::{AttemptId, AuditRecord, AuditRecorder, AuditSink};
pub use config::{GatekeeperConfig, GatekeeperConfigBuilder};
pub use database::{QueryExecutor, QueryOptions, QueryResult};
pub use error::{GatekeeperError, Result};
pub use gatekeeper::{Authorization, Gatekeeper, GatekeeperBuilder, QueryOutcome};
pub use security::{Decision, DecisionReason, Identity, RateLimiter, SqlValidator};
pub use tools::{ToolRegistry, create_registry};
