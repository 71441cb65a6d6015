//! Static query performance analysis.

use crate::error::{Result, ToolError};
use crate::gatekeeper::Gatekeeper;
use crate::protocol::{CallToolResult, Tool};
use crate::security::Decision;
use crate::tools::registry::ToolHandler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

static SELECT_STAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSELECT\s+\*").expect("Invalid regex: select star"));

static ORDER_BY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bORDER\s+BY\b").expect("Invalid regex: order by"));

static LIMIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLIMIT\b").expect("Invalid regex: limit"));

static LIKE_WILDCARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLIKE\s+'[^']*%").expect("Invalid regex: like wildcard"));

static JOIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bJOIN\b").expect("Invalid regex: join"));

/// Coarse cost bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysis {
    pub complexity: Complexity,
    pub estimated_cost: Complexity,
    pub recommendations: Vec<String>,
}

/// Heuristic analysis of `sql`. Never touches the database.
pub fn analyze_query(sql: &str) -> QueryAnalysis {
    let mut complexity = Complexity::Low;
    let mut recommendations = Vec::new();
    let mut flag = |level: Complexity, advice: &str| {
        complexity = complexity.max(level);
        recommendations.push(advice.to_string());
    };

    if SELECT_STAR.is_match(sql) {
        flag(
            Complexity::Medium,
            "Consider specifying only needed columns instead of SELECT *",
        );
    }
    if ORDER_BY.is_match(sql) && !LIMIT.is_match(sql) {
        flag(
            Complexity::Medium,
            "Add LIMIT clause when using ORDER BY to improve performance",
        );
    }
    if LIKE_WILDCARD.is_match(sql) {
        flag(
            Complexity::High,
            "Consider using indexes for LIKE queries with wildcards",
        );
    }
    if JOIN.is_match(sql) {
        flag(Complexity::Medium, "Ensure proper indexes exist on JOIN columns");
    }

    if recommendations.len() > 3 {
        complexity = Complexity::High;
    } else if recommendations.len() > 1 {
        complexity = complexity.max(Complexity::Medium);
    }

    QueryAnalysis {
        complexity,
        estimated_cost: complexity,
        recommendations,
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeQueryArgs {
    #[serde(alias = "query")]
    pub sql: String,
}

#[derive(Debug, Serialize)]
struct AnalyzeQueryOutput<'a> {
    sql: &'a str,
    timestamp: DateTime<Utc>,
    analysis: QueryAnalysis,
    /// Whether the gatekeeper would accept the query, ignoring rate limits.
    policy: Decision,
}

/// `analyze_query_performance`: recommendations plus the policy verdict.
pub struct AnalyzeQueryTool {
    gatekeeper: Arc<Gatekeeper>,
}

impl AnalyzeQueryTool {
    pub fn new(gatekeeper: Arc<Gatekeeper>) -> Self {
        Self { gatekeeper }
    }
}

#[async_trait]
impl ToolHandler for AnalyzeQueryTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "analyze_query_performance".into(),
            description: Some(
                "Analyze a SQL query without running it. Returns optimization \
                recommendations, a complexity estimate and whether the query \
                would pass the security policy. Does not count against rate limits."
                    .into(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "sql": {
                        "type": "string",
                        "description": "The SQL query to analyze"
                    }
                },
                "required": ["sql"]
            }),
        }
    }

    #[instrument(skip(self, arguments), fields(tool = "analyze_query_performance"))]
    async fn execute(&self, arguments: Value) -> Result<CallToolResult> {
        let args: AnalyzeQueryArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let output = AnalyzeQueryOutput {
            sql: &args.sql,
            timestamp: Utc::now(),
            analysis: analyze_query(&args.sql),
            policy: self.gatekeeper.evaluate(&args.sql),
        };

        Ok(CallToolResult::json(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_query_is_low() {
        let analysis = analyze_query("SELECT id, name FROM users WHERE id = 1");
        assert_eq!(analysis.complexity, Complexity::Low);
        assert_eq!(analysis.estimated_cost, Complexity::Low);
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn test_select_star_and_unbounded_order() {
        let analysis = analyze_query("select * from users order by created_at");
        assert_eq!(analysis.recommendations.len(), 2);
        assert_eq!(analysis.complexity, Complexity::Medium);

        let bounded = analyze_query("SELECT id FROM users ORDER BY id LIMIT 10");
        assert!(bounded.recommendations.is_empty());
    }

    #[test]
    fn test_wildcard_like_is_high_even_with_join() {
        let analysis = analyze_query(
            "SELECT u.id FROM users u JOIN orders o ON u.id = o.user_id WHERE u.name LIKE '%smith%'",
        );
        assert_eq!(analysis.complexity, Complexity::High);
        assert_eq!(analysis.recommendations.len(), 2);
    }

    #[test]
    fn test_many_recommendations_are_high() {
        let analysis = analyze_query(
            "SELECT * FROM a JOIN b ON a.id = b.id WHERE a.x LIKE 'x%' ORDER BY a.id",
        );
        assert_eq!(analysis.recommendations.len(), 4);
        assert_eq!(analysis.complexity, Complexity::High);
    }

    #[tokio::test]
    async fn test_tool_reports_policy_without_side_effects() {
        let (gatekeeper, audit) = Gatekeeper::builder().build_with_memory_audit().unwrap();
        let tool = AnalyzeQueryTool::new(Arc::new(gatekeeper));

        let result = tool
            .execute(serde_json::json!({"sql": "DELETE FROM users"}))
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&result.text_content()).unwrap();
        assert_eq!(body["policy"]["allowed"], false);
        assert_eq!(body["policy"]["reason"], "DENIED_PATTERN");
        assert_eq!(body["analysis"]["complexity"], "low");
        assert!(audit.is_empty());
    }
}
