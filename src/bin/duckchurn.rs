use anyhow::Result;
use clap::Parser;
use duckchurn::ChurnHarness;
use duckchurn::config::ChurnConfig;
use duckchurn::duration::{format_iso8601, parse_iso8601};
use std::time::Duration;
use tracing::{info, warn};

/// Creates, loads, verifies and drops DuckDB tables at a fixed rate to watch
/// memory under sustained catalog churn.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// How long to run, as an ISO-8601 duration (e.g. PT1H, PT15M, P1DT2H).
    /// Defaults to one hour.
    #[arg(value_name = "DURATION", value_parser = parse_duration_arg)]
    duration: Option<Duration>,
}

fn parse_duration_arg(raw: &str) -> Result<Duration, String> {
    parse_iso8601(raw).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let args = Args::parse();
    initialize_logging();

    let config = ChurnConfig::reference().with_env_overrides()?;
    let duration = args.duration.unwrap_or(config.default_run_duration);
    let harness = ChurnHarness::new(config)?;

    info!(duration = %format_iso8601(duration), "duckchurn starting");
    let summary = harness.run(duration)?;
    if !summary.shutdown.drained {
        warn!(
            abandoned = summary.shutdown.outstanding,
            "exited with tasks still running"
        );
    }
    Ok(())
}

fn initialize_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_names(true)
        .init();
}
