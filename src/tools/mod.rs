//! Agent tool definitions and registry.

pub mod analyze;
pub mod health;
pub mod query;
pub mod registry;

pub use analyze::{AnalyzeQueryTool, Complexity, QueryAnalysis, analyze_query};
pub use health::{HealthCheckTool, HealthReport, HealthStatus};
pub use query::{RunQueryOutput, RunQueryTool};
pub use registry::{ToolHandler, ToolRegistry};

use crate::database::QueryExecutor;
use crate::gatekeeper::Gatekeeper;
use std::sync::Arc;

/// Create and register all tools.
pub fn create_registry(
    gatekeeper: Arc<Gatekeeper>,
    executor: Arc<dyn QueryExecutor>,
    max_concurrent_queries: usize,
) -> ToolRegistry {
    let registry = ToolRegistry::new();

    // The health check shares the in-flight ceiling of run_query.
    let run_query = Arc::new(
        RunQueryTool::new(Arc::clone(&gatekeeper), executor)
            .with_max_concurrent(max_concurrent_queries),
    );
    registry.register(HealthCheckTool::new(Arc::clone(&run_query)));
    registry.register_shared(run_query);
    registry.register(AnalyzeQueryTool::new(gatekeeper));

    registry
}
