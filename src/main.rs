use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bootstrap;
mod config;

/// mocksmith - dual-protocol (HTTP/gRPC) mock server
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mock and management servers
    Serve,

    /// Load a multi-document YAML rule file into a running instance
    Load(LoadArgs),
}

#[derive(Args)]
struct LoadArgs {
    /// Rule file (`---`-separated YAML documents, one MockAPI each)
    file: PathBuf,

    /// Management gRPC endpoint of the running instance
    #[arg(long, default_value = "http://127.0.0.1:30000")]
    address: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    info!("starting mocksmith v{}", env!("CARGO_PKG_VERSION"));
    let config = config::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Serve => bootstrap::serve(config).await,
        Commands::Load(args) => bootstrap::load(&args.file, &args.address).await,
    };

    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            error!("command failed: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let level: tracing::Level = level.parse().context("invalid log level")?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}
