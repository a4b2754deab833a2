//! Arbor CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Incremental code-graph engine for repository analysis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Repository root path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the repository once and print a summary
    Analyze,
    /// Watch the repository and keep the graph synchronized
    Watch {
        /// Debounce window for filesystem events, in milliseconds
        #[arg(long, default_value = "500")]
        debounce_ms: u64,
    },
    /// Index the repository and write the graph as JSON to stdout
    Export {
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("arbor={}", log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Arbor v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Repository root: {}", cli.root.display());

    match cli.command {
        Commands::Analyze => commands::analyze(cli.root).await,
        Commands::Watch { debounce_ms } => commands::watch(cli.root, debounce_ms).await,
        Commands::Export { pretty } => commands::export(cli.root, pretty).await,
        Commands::Version => {
            println!("Arbor v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
