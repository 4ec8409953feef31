//! bench-publish CLI
//!
//! Publishes benchmark results to lakeFS and MLflow.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use bench_publish::check::run_check;
use bench_publish::config::Config;
use bench_publish::publish::{discover_result_files, run_publish, PublishRequest};
use bench_publish::speed::{run_speed, SpeedRequest};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bench-publish")]
#[command(about = "Publish benchmark results to lakeFS and MLflow")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Results directory (overrides the configuration)
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Disable experiment tracking
    #[arg(long)]
    no_tracker: bool,

    /// Publish one file instead of the whole results directory
    #[arg(long)]
    single_file: Option<PathBuf>,

    /// Model name of the single file
    #[arg(long, requires = "single_file")]
    model_name: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Check connectivity to the store and the tracker
    Check,
    /// Compare a model's throughput with a baseline run and log the speedup
    Speed(SpeedArgs),
}

#[derive(Args)]
struct SpeedArgs {
    /// Model name used for the tracker run
    #[arg(long)]
    model_name: String,

    /// Result file of the model (.jsonl)
    #[arg(long)]
    model_file: PathBuf,

    /// Result file of the baseline (.jsonl)
    #[arg(long)]
    baseline_file: PathBuf,

    /// Tokenizer the results were produced with
    #[arg(long)]
    tokenizer_path: Option<String>,
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::warn!("interrupt received");
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    bench_publish::logging::init(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Some(Command::Check) => {
            let report = run_check(&config).await;
            print!("{report}");
            return Ok(ExitCode::from(report.exit_code()));
        }
        Some(Command::Speed(args)) => {
            let request = SpeedRequest {
                model_name: args.model_name,
                model_file: args.model_file,
                baseline_file: args.baseline_file,
                tokenizer_path: args.tokenizer_path,
            };
            let report = run_speed(&config, &request, !cli.no_tracker, interrupted())
                .await
                .context("Speed analysis failed")?;
            print!("{report}");
            return Ok(ExitCode::from(report.exit_code()));
        }
        None => {}
    }

    config.validate().context("Invalid configuration")?;

    let request = match cli.single_file {
        Some(file) => PublishRequest::single(file, cli.model_name),
        None => {
            let results_dir = cli
                .results_dir
                .unwrap_or_else(|| config.benchmark.results_dir.clone());
            let files = discover_result_files(&results_dir);
            PublishRequest::batch(results_dir, files)
        }
    };

    let report = run_publish(&config, &request, !cli.no_tracker, interrupted()).await;
    print!("{report}");
    Ok(ExitCode::from(report.exit_code()))
}
