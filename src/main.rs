//! Operator CLI: classify SQL statements read from stdin.
//!
//! Each non-blank input line is one statement. For each, one JSON object is
//! written to stdout with the policy decision and a performance analysis.
//! Nothing is executed, so no rate budget is charged and no audit record is
//! written.

use anyhow::Result;
use query_gatekeeper::{
    Decision, Gatekeeper, GatekeeperConfigBuilder,
    tools::{QueryAnalysis, analyze_query},
};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Serialize)]
struct Classification<'a> {
    line: usize,
    sql: &'a str,
    message: String,
    #[serde(flatten)]
    decision: Decision,
    analysis: QueryAnalysis,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!(
        "Starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = GatekeeperConfigBuilder::new().from_env()?.build()?;
    let identity = config.operator.identity();
    let gatekeeper = Gatekeeper::builder().config(config).build()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut classified = 0usize;
    let mut denied = 0usize;

    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let sql = line.trim();
        if sql.is_empty() {
            continue;
        }

        let decision = gatekeeper.evaluate(sql);
        debug!(identity = %identity, reason = %decision.reason(), "Classified line {}", line_no);
        if !decision.is_allowed() {
            denied += 1;
        }
        classified += 1;

        let output = Classification {
            line: line_no,
            sql,
            message: decision.message(),
            decision,
            analysis: analyze_query(sql),
        };
        let mut json = serde_json::to_vec(&output)?;
        json.push(b'\n');
        stdout.write_all(&json).await?;
    }
    stdout.flush().await?;

    info!(identity = %identity, classified, denied, "Classification complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("query_gatekeeper=info,warn"));

    // stdout carries the classifications
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .json()
        .init();
}
