//! Leakscope CLI: run leakage campaigns, analyze them and manage baselines.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Leakscope: measure what coarse sandbox telemetry leaks, and what hiding it costs
#[derive(Parser, Debug)]
#[command(name = "leakscope", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds leakscope.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the configured trial campaign and analyze it
    Run {
        /// Keep the existing dataset and only run missing trials
        #[arg(long)]
        resume: bool,
        /// Use the synthetic executor instead of the sandbox runtime
        #[arg(long)]
        simulated: bool,
        /// Override the number of concurrent sandbox slots
        #[arg(long)]
        slots: Option<usize>,
        /// Skip the analysis after the campaign
        #[arg(long)]
        no_analyze: bool,
    },
    /// Analyze an existing dataset and write the result artifacts
    Analyze {
        /// Dataset CSV (defaults to the campaign's output path)
        #[arg(long)]
        dataset: Option<PathBuf>,
    },
    /// Manage baseline snapshots
    Baseline {
        #[command(subcommand)]
        action: BaselineAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum BaselineAction {
    /// Freeze the current dataset, results and environment as a named baseline
    Freeze {
        /// Snapshot name (a single path component)
        name: String,
    },
    /// Compare the current results with a frozen baseline
    Compare {
        /// Snapshot name
        name: String,
        /// Largest accepted increase in accuracy or overhead
        #[arg(long, default_value = "0.05")]
        tolerance: f64,
    },
    /// Re-hash a baseline and report modified or missing files
    Verify {
        /// Snapshot name
        name: String,
    },
    /// List frozen baselines
    List,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default leakscope.toml in the workspace
    Init,
    /// Show the resolved configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "leakscope", "leakscope")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "leakscope.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}
