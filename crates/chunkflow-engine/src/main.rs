//! Chunkflow - chunked bulk query runner

use anyhow::{Context, Result};
use chunkflow_common::logging::{init_logging, LogConfig};
use chunkflow_engine::config::{DiscoveryStrategy, EngineConfig};
use chunkflow_engine::coordinator::JobCoordinator;
use chunkflow_engine::scripted::{Scenario, ScriptedClient};
use chunkflow_engine::sink::OutputTarget;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "chunkflow")]
#[command(author, version, about = "Chunked bulk query orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a job against a scripted service
    Simulate {
        /// Scenario file (JSON)
        #[arg(short, long)]
        scenario: PathBuf,

        /// Output file; stdout when omitted
        #[arg(short, long, env = "CHUNKFLOW_OUTPUT")]
        output: Option<PathBuf>,

        /// gzip the output file
        #[arg(long)]
        gzip: bool,

        /// Keep only the first CSV header line
        #[arg(long)]
        single_header: bool,

        /// Chunk pipelines running at once
        #[arg(short, long)]
        workers: Option<usize>,

        /// Seconds between status checks
        #[arg(long)]
        poll_period_secs: Option<u64>,

        /// Seconds before a running chunk is abandoned (0 disables)
        #[arg(long)]
        poll_deadline_secs: Option<u64>,

        /// Rows per chunk (0 submits an unchunked job)
        #[arg(long)]
        chunk_size: Option<u32>,

        /// fixed_wait or await_original
        #[arg(long)]
        discovery: Option<DiscoveryStrategy>,

        /// Write the run report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the effective engine configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Environment takes precedence over the verbose flag
    let log_config = LogConfig::for_cli(cli.verbose).with_env()?;
    let _guard = init_logging(&log_config)?;

    let mut config = EngineConfig::from_env().context("Failed to load engine configuration")?;

    match cli.command {
        Command::Simulate {
            scenario,
            output,
            gzip,
            single_header,
            workers,
            poll_period_secs,
            poll_deadline_secs,
            chunk_size,
            discovery,
            report,
        } => {
            if output.is_some() {
                config.output.path = output;
            }
            config.output.gzip |= gzip;
            config.output.dedupe_headers |= single_header;
            if let Some(workers) = workers {
                config.worker_pool_size = workers;
            }
            if let Some(secs) = poll_period_secs {
                config.poll.period_secs = secs;
            }
            if let Some(secs) = poll_deadline_secs {
                config.poll.deadline_secs = (secs > 0).then_some(secs);
            }
            if let Some(size) = chunk_size {
                config.chunk_size = (size > 0).then_some(size);
            }
            if let Some(strategy) = discovery {
                config.discovery.strategy = strategy;
            }
            config.validate()?;

            simulate(&scenario, config, report.as_deref()).await
        },
        Command::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

async fn simulate(
    scenario_path: &std::path::Path,
    config: EngineConfig,
    report_path: Option<&std::path::Path>,
) -> Result<()> {
    let scenario = Scenario::load(scenario_path)
        .with_context(|| format!("Failed to load scenario {}", scenario_path.display()))?;
    info!(scenario = %scenario_path.display(), job_id = %scenario.job_id, "Starting simulation");

    let query = scenario.query.clone();
    let object = scenario.object.clone();
    let target = OutputTarget::from_config(&config.output);

    let coordinator = JobCoordinator::new(Arc::new(ScriptedClient::new(scenario)), config);
    let spec = coordinator.job_spec(object);
    let report = coordinator.run(&spec, &query, target).await?;

    report.log_summary();

    if let Some(path) = report_path {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), "Run report written");
    }

    Ok(())
}
