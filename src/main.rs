//! seismofuse - multi-agency earthquake report fusion from your terminal.
//!
//! Polls seismological agencies, fuses overlapping reports into unified
//! events, and emits them with quality indicators. Runs once (`batch`) or
//! until stopped (`worker`), backed by the in-memory reference store.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;

use seismofuse::config::Config;
use seismofuse::models::RunStatus;
use seismofuse::output::{self, Format};
use seismofuse::pipeline::Pipeline;
use seismofuse::store::MemoryStore;
use seismofuse::transport::{RateGate, Transport};

/// Multi-agency earthquake report fusion.
#[derive(Parser, Debug)]
#[command(name = "seismofuse")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to run
    #[command(subcommand)]
    command: Command,

    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Poll all enabled sources once, cluster, emit unified events, exit
    Batch(BatchArgs),

    /// Run per-source pollers and the clustering loop until interrupted
    Worker,
}

/// Arguments for the `batch` command.
#[derive(Parser, Debug)]
struct BatchArgs {
    /// Output format for unified events
    #[arg(long, short = 'f', default_value = "human", value_parser = parse_format)]
    format: Format,
}

fn parse_format(s: &str) -> Result<Format, String> {
    s.parse()
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Command::Batch(args) => cmd_batch(config, args),
        Command::Worker => cmd_worker(config),
    }
}

/// Initialize tracing subscriber.
fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn build_pipeline(config: Config) -> Result<Pipeline<MemoryStore, Transport>> {
    let gate = Arc::new(RateGate::new());
    let transport =
        Transport::new(config.clone(), gate).context("failed to create transport client")?;
    Ok(Pipeline::new(
        Arc::new(transport),
        Arc::new(MemoryStore::new()),
        config,
    ))
}

/// Execute the `batch` command - one-shot poll, cluster, emit, exit.
fn cmd_batch(config: Config, args: BatchArgs) -> Result<ExitCode> {
    let pipeline = build_pipeline(config)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    runtime.block_on(async {
        let run = pipeline.run_batch().await.context("batch run failed")?;

        let mut events = pipeline.store().unified_events().await;
        events.sort_by(|a, b| b.origin_time_utc.cmp(&a.origin_time_utc));

        let stdout = io::stdout();
        let mut handle = stdout.lock();
        output::write_events(&mut handle, &events, args.format)?;
        handle.flush()?;

        match run.status {
            RunStatus::Ok => Ok(ExitCode::SUCCESS),
            RunStatus::Failed => {
                eprintln!(
                    "Run failed: {}",
                    run.error_message.as_deref().unwrap_or("unknown error")
                );
                Ok(ExitCode::FAILURE)
            }
        }
    })
}

/// Execute the `worker` command - run until Ctrl+C.
fn cmd_worker(config: Config) -> Result<ExitCode> {
    let pipeline = build_pipeline(config)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    runtime.block_on(async {
        let (shutdown, _) = tokio::sync::broadcast::channel(1);

        let worker = {
            let pipeline = pipeline.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { pipeline.run_worker(&shutdown).await })
        };

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;
        tracing::info!("shutdown requested");
        let _ = shutdown.send(());

        // Pollers abandon in-flight work promptly; don't wait forever
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), worker).await;
        Ok(ExitCode::SUCCESS)
    })
}
