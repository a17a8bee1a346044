//! R0N Cluster binary entry point.

use clap::Parser;
use r0n_cluster::config::{BasicValidator, ConfigLoader, LogFormat, LoggingConfig};
use r0n_cluster::host::{ClusterHost, Collaborators};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "r0n-cluster", version)]
#[command(about = "Cluster coordination engine running on in-process collaborators")]
struct Cli {
    /// Configuration file. Defaults apply when it does not exist.
    #[arg(short, long, default_value = "r0n-cluster.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

fn init_logging(config: &LoggingConfig) {
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .with_validator(BasicValidator::new())
        .load_or_default(&cli.config)?;
    init_logging(&config.logging);

    if cli.config.exists() {
        info!(path = %cli.config.display(), "Loaded configuration");
    } else {
        info!(path = %cli.config.display(), "Configuration file not found, using defaults");
    }
    if cli.check {
        info!("Configuration is valid");
        return Ok(());
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting R0N Cluster");
    let mut host = ClusterHost::new(&config, Collaborators::in_memory());
    host.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    host.shutdown().await?;

    for line in host.metrics_text().lines() {
        info!(metric = %line, "Final metrics");
    }
    Ok(())
}
