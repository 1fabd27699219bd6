//! Batch Classifier (tagger-batch) - Main entry point
//!
//! Classifies a song catalog through an asynchronous batch API. Each step is
//! a subcommand; `run` drives every remaining step and `status` inspects a
//! run folder without modifying it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tagger_batch::config::{CliOverrides, PipelineConfig};
use tagger_batch::layout::RunLayout;
use tagger_batch::models::PipelineStep;
use tagger_batch::services::orchestrator::status_report;
use tagger_batch::services::{BatchApi, CheckpointStore, HttpBatchClient};
use tagger_batch::{Pipeline, RunFailure};
use tagger_common::config::{load_toml_config, locate_config_file};
use tagger_common::human_time::format_progress;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for tagger-batch
#[derive(Parser, Debug)]
#[command(name = "tagger-batch")]
#[command(about = "Batch classification pipeline for song catalogs")]
#[command(version)]
struct Args {
    /// Run folder holding the checkpoint and artifacts
    #[arg(long, global = true)]
    run_dir: Option<PathBuf>,

    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model for classification requests
    #[arg(long, global = true)]
    model: Option<String>,

    /// Debug logging (unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the input CSV and write the batch request file
    Prepare {
        /// Source CSV (id, title, artist, optional extra columns)
        input: PathBuf,
    },
    /// Upload the request file and create the remote batch job
    Submit,
    /// Poll the remote job until it reaches a terminal state
    Monitor {
        /// Stop after this many polls; re-run to continue
        #[arg(long)]
        max_polls: Option<u32>,

        /// Seconds between polls
        #[arg(long)]
        poll_interval_secs: Option<u64>,
    },
    /// Download and reconcile the job's results
    Process,
    /// Write the classified CSV
    Export {
        /// Output CSV (default: classified.csv in the run folder)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run every remaining step
    Run {
        /// Source CSV; required until the run is prepared
        input: Option<PathBuf>,

        /// Output CSV (default: classified.csv in the run folder)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Stop monitoring after this many polls
        #[arg(long)]
        max_polls: Option<u32>,

        /// Seconds between polls
        #[arg(long)]
        poll_interval_secs: Option<u64>,
    },
    /// Show the checkpoint summary and next step
    Status,
}

impl Command {
    /// Pipeline step a single-step subcommand runs
    fn step(&self) -> Option<PipelineStep> {
        match self {
            Command::Prepare { .. } => Some(PipelineStep::Prepare),
            Command::Submit => Some(PipelineStep::Submit),
            Command::Monitor { .. } => Some(PipelineStep::Monitor),
            Command::Process => Some(PipelineStep::Process),
            Command::Export { .. } => Some(PipelineStep::Export),
            Command::Run { .. } | Command::Status => None,
        }
    }
}

/// Exit status for a run stopped by SIGINT/SIGTERM (128 + SIGINT)
const INTERRUPTED_EXIT: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Dropping the command future drops the pipeline, which releases the run lock
    tokio::select! {
        result = execute(args) => match result {
            Ok(code) => code,
            Err(e) => {
                tracing::error!("{:#}", e);
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
        _ = shutdown_signal() => {
            eprintln!("Interrupted. Progress is checkpointed; re-run the same command to resume.");
            ExitCode::from(INTERRUPTED_EXIT)
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping");
        },
    }
}

fn init_tracing(verbose: bool, level: &str) {
    let default_filter = if verbose {
        "tagger_batch=debug,tagger_common=debug".to_string()
    } else {
        format!("tagger_batch={level},tagger_common={level}")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn execute(args: Args) -> Result<ExitCode> {
    let config_path = locate_config_file(args.config.as_deref())?;
    let toml_config = load_toml_config(config_path.as_deref())?;

    init_tracing(args.verbose, &toml_config.logging.level);
    if let Some(path) = &config_path {
        info!("Using config file {}", path.display());
    }

    let (max_polls, poll_interval_secs) = match &args.command {
        Command::Monitor { max_polls, poll_interval_secs }
        | Command::Run { max_polls, poll_interval_secs, .. } => (*max_polls, *poll_interval_secs),
        _ => (None, None),
    };
    let overrides = CliOverrides {
        run_dir: args.run_dir.clone(),
        model: args.model.clone(),
        poll_interval_secs,
        max_polls,
    };
    let config = PipelineConfig::resolve(&overrides, &toml_config)
        .context("Failed to resolve configuration")?;
    let run_dir = config.run_dir.clone();

    if let Command::Status = args.command {
        let layout = RunLayout::new(&run_dir);
        let checkpoint = CheckpointStore::new(layout.checkpoint()).load()?;
        println!("{}", status_report(&layout, checkpoint.as_ref()));
        return Ok(ExitCode::SUCCESS);
    }

    let api: Option<Arc<dyn BatchApi>> = match &config.api.api_key {
        Some(key) => Some(Arc::new(
            HttpBatchClient::new(config.api.base_url.clone(), key.clone())
                .context("Failed to create batch API client")?,
        ) as Arc<dyn BatchApi>),
        None => None,
    };

    let step = args.command.step();
    let mut pipeline = Pipeline::open(config, api)
        .with_context(|| format!("Failed to open run folder {}", run_dir.display()))?;

    let outcome = match args.command {
        Command::Prepare { input } => pipeline.prepare(&input).map(|output| {
            println!(
                "Prepared {} request(s) ({} row(s) rejected) → {}",
                output.manifest.total_accepted,
                output.manifest.total_rejected,
                output.request_file.display()
            );
        }),
        Command::Submit => pipeline.submit().await.map(|job_id| {
            println!("Submitted batch job {}", job_id);
        }),
        Command::Monitor { .. } => pipeline.monitor().await.map(|report| {
            let progress = format_progress(report.request_counts.completed, report.request_counts.total);
            if report.is_completed() {
                println!("Batch job {} completed: {}", report.job_id, progress);
            } else {
                println!(
                    "Batch job {} is {} ({}); re-run monitor to continue",
                    report.job_id, report.status, progress
                );
            }
        }),
        Command::Process => pipeline.process().await.map(|results| {
            println!("Processed {} result(s)", results.len());
        }),
        Command::Export { output } => pipeline.export(output.as_deref()).map(|stats| {
            println!("{}", stats.display_string());
        }),
        Command::Run { input, output, .. } => {
            return match pipeline.run(input.as_deref(), output.as_deref()).await {
                Ok(summary) => {
                    println!("{}", summary.render());
                    Ok(ExitCode::SUCCESS)
                }
                Err(failure) => Ok(report_failure(&failure, &run_dir)),
            };
        }
        Command::Status => {
            println!("{}", pipeline.status_report());
            Ok(())
        }
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(error) => {
            let failure = RunFailure {
                step: step.unwrap_or(PipelineStep::Prepare),
                phase: pipeline.checkpoint().phase,
                error,
            };
            Ok(report_failure(&failure, &run_dir))
        }
    }
}

fn report_failure(failure: &RunFailure, run_dir: &Path) -> ExitCode {
    tracing::error!(
        step = %failure.step,
        phase = %failure.phase,
        "Pipeline stopped: {}",
        failure.error
    );
    eprintln!("Error: {}", failure.error);
    eprintln!("Stopped at phase '{}' during '{}'.", failure.phase, failure.step);
    if failure.error.is_retriable() {
        eprintln!("This failure may be temporary; re-running the step is enough.");
    }
    eprintln!("Resume with: {}", failure.resume_command(run_dir));
    ExitCode::FAILURE
}
