use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use olivia::network::start_incoming_network;
use olivia::utils::logging::init_logging;
use olivia::{Cache, Config, MessageHandler};

#[derive(Parser, Debug)]
#[command(version, about = "Run an olivia cache node", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address to accept inbound connections on
    #[arg(long)]
    listen: Option<String>,
    /// Only accept inbound connections, never dial peers at startup
    #[arg(long)]
    base_node: bool,
    /// Primary peer address, may be repeated
    #[arg(long = "peer")]
    peers: Vec<String>,
    /// Backup peer address, may be repeated
    #[arg(long = "backup-peer")]
    backup_peers: Vec<String>,
    /// Primary heartbeat interval in milliseconds
    #[arg(long)]
    heartbeat_interval: Option<u64>,
    /// Backup heartbeat and bloom filter sync interval in seconds
    #[arg(long)]
    heartbeat_loop: Option<u64>,
    /// Module to trace in addition to the default filter
    #[arg(long)]
    log_component: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(listen) = self.listen {
            config.listen_address = listen;
        }
        if self.base_node {
            config.base_node = true;
        }
        if !self.peers.is_empty() {
            config.remote_peers = self.peers;
        }
        if !self.backup_peers.is_empty() {
            config.backup_peers = self.backup_peers;
        }
        if let Some(interval) = self.heartbeat_interval {
            config.heartbeat_interval = interval;
        }
        if let Some(cycle) = self.heartbeat_loop {
            config.heartbeat_loop = cycle;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_component.as_deref());

    let config = args.into_config().context("Failed to load configuration")?;
    info!(
        "💡 Starting node on {} ({} primary, {} backup peers, base node: {})",
        config.listen_address,
        config.remote_peers.len(),
        config.backup_peers.len(),
        config.base_node
    );

    let handler = Arc::new(MessageHandler::new(&config));
    let cache = Arc::new(Cache::new());
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("❎ Received interrupt");
                signal.cancel();
            }
            Err(e) => error!("❌ Failed to listen for interrupt: {}", e),
        }
    });

    start_incoming_network(handler, cache, config, shutdown).await?;
    info!("👋 Node stopped");
    Ok(())
}
