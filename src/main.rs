mod config;
mod events;
mod miner;
mod model;
mod network;
mod orchestrator;
mod preimage;
mod state;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use model::Address;
use network::{HttpNetworkClient, RoundRobinDevFeePool, Sha256HashEngine};
use orchestrator::{
    ChallengePollerConfig, CoordinatorConfig, FileReceiptLog, MiningCoordinator, ReceiptLog,
};

#[derive(Parser)]
#[command(name = "challenge-miner")]
#[command(about = "Proof-of-work mining client for a challenge/response network", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mining coordinator to completion (until the window closes
    /// or it is interrupted).
    Run {
        /// Configuration file path.
        #[arg(short, long, default_value = "config.toml", env = "CHALLENGE_MINER_CONFIG")]
        config: String,
    },
    /// Write a default configuration file.
    InitConfig {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },
    /// Replay the durable receipt/error log and print a summary, without
    /// starting the coordinator.
    ReplayState {
        /// Configuration file path (only `state.receipt_log_path` is used).
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "challenge_miner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(&config).await?,
        Commands::InitConfig { output } => {
            let config = config::Config::default();
            config.save(&output)?;
            info!("configuration file created at {}", output);
        }
        Commands::ReplayState { config } => replay_state(&config)?,
    }

    Ok(())
}

async fn run(config_path: &str) -> Result<()> {
    let cfg = config::Config::load(config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    let addresses = load_addresses(&cfg.state.addresses_file)
        .with_context(|| format!("loading addresses from {}", cfg.state.addresses_file))?;
    info!(count = addresses.len(), "loaded addresses");

    let dev_fee_addresses = if cfg.dev_fee.enabled {
        load_dev_fee_addresses(&cfg.dev_fee.addresses_file).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "no dev-fee address pool available, dev-fee mining disabled this run");
            Vec::new()
        })
    } else {
        Vec::new()
    };

    let network = Arc::new(HttpNetworkClient::new(cfg.network.base_url.clone())?);
    let hash_engine = Arc::new(Sha256HashEngine::new());
    let receipt_log: Arc<dyn ReceiptLog> = Arc::new(FileReceiptLog::new(cfg.state.receipt_log_path.clone()));
    let dev_fee_pool = Arc::new(RoundRobinDevFeePool::new(dev_fee_addresses));

    let coordinator_config = CoordinatorConfig {
        worker_threads: cfg.mining.worker_threads,
        batch_size: cfg.mining.batch_size,
        max_submission_failures: cfg.mining.max_submission_failures,
        dev_fee_ratio: cfg.dev_fee.ratio,
        dev_fee_enabled: cfg.dev_fee.enabled,
        poll: ChallengePollerConfig {
            poll_interval: std::time::Duration::from_millis(cfg.network.poll_interval_ms),
            max_consecutive_failures: 10,
        },
    };

    let coordinator = Arc::new(MiningCoordinator::new(
        coordinator_config,
        network,
        hash_engine,
        receipt_log,
        dev_fee_pool,
        addresses,
    ));

    let stop_handle = coordinator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested, draining");
            stop_handle.request_stop();
        }
    });

    coordinator.run().await
}

fn replay_state(config_path: &str) -> Result<()> {
    let cfg = config::Config::load(config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;
    let log = FileReceiptLog::new(cfg.state.receipt_log_path.clone());
    let replayed = log.replay().context("replaying durable state")?;

    let user = replayed.receipts.iter().filter(|r| !r.is_dev_fee).count();
    let dev_fee = replayed.receipts.iter().filter(|r| r.is_dev_fee).count();

    info!(
        receipts = replayed.receipts.len(),
        errors = replayed.errors.len(),
        user,
        dev_fee,
        "durable state replay summary"
    );
    Ok(())
}

fn load_addresses(path: &str) -> Result<Vec<Address>> {
    let content = std::fs::read_to_string(Path::new(path))?;
    let addresses: Vec<Address> = serde_json::from_str(&content)?;
    anyhow::ensure!(!addresses.is_empty(), "address list at {path} is empty");
    Ok(addresses)
}

fn load_dev_fee_addresses(path: &str) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(Path::new(path))?;
    let addresses: Vec<String> = serde_json::from_str(&content)?;
    Ok(addresses)
}
