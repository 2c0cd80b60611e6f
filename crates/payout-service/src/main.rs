//! Main entry point for the reward payout service.
//!
//! Scans pending community rewards, dispatches them as batched on-chain
//! transactions, and watches each chain until every transaction is settled.

use clap::Parser;
use payout_config::Config;
use payout_core::{PayoutBuilder, PayoutEngine};
use payout_storage::implementations::ledger::MemoryLedger;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

mod server;

/// Command-line arguments for the payout service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Main entry point for the payout service.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the payout engine over the ledger
/// 5. Runs until interrupted, then drains every background task
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let default_directive = args.log_level.to_string();
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started payout service");

	let config = Config::from_file(&args.config.to_string_lossy()).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let (stop, shutdown) = watch::channel(false);
	let ledger = seed_ledger(&config).await;
	let engine = PayoutBuilder::new(config.clone()).build(ledger.repositories(), shutdown.clone())?;

	let api_task = config
		.api
		.clone()
		.filter(|api| api.enabled)
		.map(|api_config| {
			let facade = engine.facade().clone();
			let shutdown = shutdown.clone();
			tokio::spawn(async move {
				if let Err(e) = server::start_server(api_config, facade, shutdown).await {
					tracing::error!(error = %e, "API server failed");
				}
			})
		});
	if api_task.is_none() {
		tracing::info!("API server disabled");
	}

	run_until_interrupted(&engine, &stop, shutdown).await;

	if let Some(task) = api_task {
		if let Err(e) = task.await {
			tracing::warn!(error = %e, "API server task failed");
		}
	}

	tracing::info!("Stopped payout service");
	Ok(())
}

/// Loads the configured chains into the ledger.
async fn seed_ledger(config: &Config) -> Arc<MemoryLedger> {
	let ledger = Arc::new(MemoryLedger::new());
	for chain in &config.chains {
		ledger.upsert_chain(chain.clone()).await;
	}
	tracing::info!(chains = config.chains.len(), "Seeded chain definitions");
	ledger
}

/// Runs the engine until it returns on its own or ctrl-c arrives. On ctrl-c
/// the shutdown signal is flipped and the engine is awaited so in-flight work
/// completes.
async fn run_until_interrupted(
	engine: &PayoutEngine,
	stop: &watch::Sender<bool>,
	shutdown: watch::Receiver<bool>,
) {
	let mut run = std::pin::pin!(engine.run(shutdown));
	tokio::select! {
		_ = &mut run => {
			tracing::info!("Payout engine finished");
			let _ = stop.send(true);
			return;
		}
		result = tokio::signal::ctrl_c() => {
			if let Err(e) = result {
				tracing::warn!(error = %e, "Failed to listen for ctrl-c");
			}
			tracing::info!("Shutdown requested");
		}
	}
	let _ = stop.send(true);
	run.await;
}
