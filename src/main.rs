//! # Capture Sieve CLI (`sieve`)
//!
//! ## Usage
//!
//! ```bash
//! sieve --config ./config/sieve.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sieve run` | Process every source once, publish matches, print the report |
//! | `sieve run --dry-run` | Show the batches each source would process |
//! | `sieve status` | Show watermarks, override queues and the last run time |
//!
//! Logs go to stderr (`RUST_LOG`, default `info`). Progress goes to stderr as
//! well; stdout carries only the report, plan or status table.

use std::path::PathBuf;

use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use capture_sieve::classify::create_classifier;
use capture_sieve::config::load_config;
use capture_sieve::pipeline::Pipeline;
use capture_sieve::progress::ProgressMode;
use capture_sieve::remote::create_connector;
use capture_sieve::report::{render_report, FileReportSink, ReportSink};

/// Capture Sieve: incremental batch ingestion and image classification.
#[derive(Parser)]
#[command(
    name = "sieve",
    about = "Capture Sieve: incremental batch ingestion and image classification",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sieve.toml")]
    config: PathBuf,

    /// Progress output on stderr: auto, human, json or off.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every configured source once.
    ///
    /// Discovers new batches (or the queued override batches), sequences,
    /// stages and classifies them, publishes the matches, commits each
    /// source's checkpoint and prints the run report.
    Run {
        /// Show what would be processed without touching anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show each source's watermark and override queue.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    let mode = ProgressMode::parse(&cli.progress).ok_or_else(|| {
        anyhow!(
            "Invalid --progress value '{}'. Must be auto, human, json or off.",
            cli.progress
        )
    })?;
    let progress = mode.reporter();
    let connector = create_connector(&cfg.remote)?;
    let pipeline = Pipeline::new(&cfg, connector.as_ref(), progress.as_ref())?;

    match cli.command {
        Commands::Status => {
            let status = pipeline.status().await?;
            print!("{}", status.render());
        }
        Commands::Run { dry_run: true } => {
            let plan = pipeline.plan().await?;
            print!("{}", plan.render());
        }
        Commands::Run { dry_run: false } => {
            let api_key = cfg.classifier.resolve_api_key()?;
            let classifier = create_classifier(&cfg.classifier, api_key)?;
            let summary = pipeline.run_once(classifier.as_ref()).await?;

            let report = render_report(&cfg.report.title, &summary);
            print!("{}", report.body);

            let sink = FileReportSink::new(&cfg.report, connector.as_ref());
            if let Err(e) = sink.deliver(&report).await {
                warn!(error = %e, "report delivery failed");
            }

            if !summary.failures.is_empty() {
                bail!(
                    "{} failure(s) during the run; see the report for details",
                    summary.failures.len()
                );
            }
        }
    }

    Ok(())
}
