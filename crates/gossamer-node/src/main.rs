// Maelstrom broadcast node over stdin/stdout

use anyhow::Context;
use clap::Parser;
use gossamer_node::NodeConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gossamer-node")]
#[command(about = "Gossamer - gossip broadcast node for Maelstrom", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Anti-entropy tick period in milliseconds
    #[arg(long)]
    gossip_interval_ms: Option<u64>,

    /// Peer RPC timeout in milliseconds
    #[arg(long)]
    rpc_timeout_ms: Option<u64>,

    /// Delivery attempts per delta, including the first
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load_from_file(path)?,
        None => NodeConfig::default(),
    };
    config.merge_with_env()?;

    if let Some(ms) = cli.gossip_interval_ms {
        config.gossip_interval_ms = ms;
    }
    if let Some(ms) = cli.rpc_timeout_ms {
        config.rpc_timeout_ms = ms;
    }
    if let Some(attempts) = cli.max_attempts {
        config.max_attempts = attempts;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).context("Failed to load configuration")?;

    // stdout carries the protocol, so logs go to stderr
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        gossip_interval_ms = config.gossip_interval_ms,
        max_attempts = config.max_attempts,
        "Starting node"
    );

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    gossamer_node::serve(config, stdin, tokio::io::stdout()).await?;
    Ok(())
}
