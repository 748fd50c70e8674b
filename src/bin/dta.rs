//! Thin CLI embedding of the advisor: reads a DSN and a workload source from
//! the command line, runs `analyze_workload`, and prints the resulting
//! recommendations and trace.

use clap::Parser;
use dta_advisor::config::DtaConfig;
use dta_advisor::session::{AnalyzeWorkloadInput, DtaOrchestrator};
use dta_advisor::sql::PostgresDriver;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "dta", about = "PostgreSQL database tuning advisor")]
struct Args {
    /// Postgres connection string.
    #[arg(long)]
    dsn: String,

    /// Path to a `;`-delimited SQL file to use as the workload.
    #[arg(long)]
    sql_file: Option<String>,

    /// A single query to analyze, repeatable.
    #[arg(long = "query")]
    queries: Vec<String>,

    /// Storage budget in megabytes; negative disables the budget.
    #[arg(long, default_value_t = -1)]
    max_index_size_mb: i64,

    /// Exit nonzero when a precondition check fails, instead of just
    /// reporting it.
    #[arg(long, default_value_t = false)]
    strict: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let driver = match PostgresDriver::connect(&args.dsn).await {
        Ok(driver) => Arc::new(driver),
        Err(err) => {
            eprintln!("failed to connect: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let orchestrator = DtaOrchestrator::new(driver, DtaConfig::from_env(), 160000);

    let input = AnalyzeWorkloadInput {
        sql_file: args.sql_file,
        query_list: if args.queries.is_empty() {
            None
        } else {
            Some(args.queries)
        },
        max_index_size_mb: args.max_index_size_mb,
        min_calls: 50,
        min_avg_time_ms: 5.0,
        limit: 100,
        ..Default::default()
    };

    let session = orchestrator.analyze_workload(input).await;

    for line in &session.trace {
        println!("# {line}");
    }

    if let Some(error) = &session.error {
        eprintln!("session failed: {error}");
        return if args.strict {
            std::process::ExitCode::FAILURE
        } else {
            std::process::ExitCode::SUCCESS
        };
    }

    for rec in &session.recommendations {
        println!(
            "{} -- size={}B progressive_improvement={:.2}x",
            rec.definition,
            rec.estimated_size_bytes,
            rec.progressive_improvement_multiple()
        );
    }

    std::process::ExitCode::SUCCESS
}
