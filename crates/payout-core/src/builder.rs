//! Assembly of the payout engine from configuration.
//!
//! The cache backend is chosen by name from the registered storage
//! factories; every other component is wired from the typed configuration
//! sections.

use crate::facade::PayoutFacade;
use crate::factory::EvmChainFactory;
use crate::manager::PayoutManager;
use crate::ManagerError;
use alloy::primitives::Bytes;
use payout_account::WalletDeriver;
use payout_config::Config;
use payout_delivery::{AlloyConnector, RpcConnector};
use payout_storage::{get_all_implementations, Repositories, StorageFactory, StorageService};
use payout_types::without_0x_prefix;
use payout_watcher::TrackedSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A fully wired payout service.
pub struct PayoutEngine {
	manager: Arc<PayoutManager>,
	facade: Arc<PayoutFacade>,
	storage: Arc<StorageService>,
	factory: Arc<EvmChainFactory>,
	cleanup_interval: Duration,
}

impl PayoutEngine {
	pub fn manager(&self) -> &Arc<PayoutManager> {
		&self.manager
	}

	pub fn facade(&self) -> &Arc<PayoutFacade> {
		&self.facade
	}

	/// Runs the manager loop and the cache cleanup until shutdown, then waits
	/// for every per-chain task to stop.
	pub async fn run(&self, shutdown: watch::Receiver<bool>) {
		let cleanup = tokio::spawn(cleanup_loop(
			self.storage.clone(),
			self.cleanup_interval,
			shutdown.clone(),
		));

		self.manager.run(shutdown).await;

		if let Err(e) = cleanup.await {
			warn!(error = %e, "Storage cleanup task failed");
		}
		for task in self.factory.take_tasks().await {
			if let Err(e) = task.await {
				warn!(error = %e, "Chain task failed");
			}
		}
		info!("Payout engine stopped");
	}
}

async fn cleanup_loop(
	storage: Arc<StorageService>,
	interval: Duration,
	mut shutdown: watch::Receiver<bool>,
) {
	loop {
		tokio::select! {
			_ = tokio::time::sleep(interval) => {
				match storage.cleanup_expired().await {
					Ok(count) if count > 0 => {
						debug!(removed = count, "Storage cleanup");
					},
					Ok(_) => {},
					Err(e) => {
						warn!(error = %e, "Storage cleanup failed");
					},
				}
			}
			_ = shutdown.changed() => return,
		}
	}
}

/// Builder for a `PayoutEngine`.
pub struct PayoutBuilder {
	config: Config,
	storage_factories: HashMap<String, StorageFactory>,
	connector: Arc<dyn RpcConnector>,
}

impl PayoutBuilder {
	/// Starts from the built-in storage backends and the HTTP RPC connector.
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage_factories: get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
			connector: Arc::new(AlloyConnector),
		}
	}

	/// Registers an additional cache backend under `name`.
	pub fn with_storage_factory(mut self, name: &str, factory: StorageFactory) -> Self {
		self.storage_factories.insert(name.to_string(), factory);
		self
	}

	pub fn with_connector(mut self, connector: Arc<dyn RpcConnector>) -> Self {
		self.connector = connector;
		self
	}

	pub fn build(
		self,
		repos: Repositories,
		shutdown: watch::Receiver<bool>,
	) -> Result<PayoutEngine, ManagerError> {
		let primary = &self.config.storage.primary;
		let factory = self.storage_factories.get(primary).ok_or_else(|| {
			ManagerError::Config(format!("Unknown storage implementation '{}'", primary))
		})?;
		let storage_config = self
			.config
			.storage
			.implementations
			.get(primary)
			.cloned()
			.unwrap_or_else(|| toml::Value::Table(Default::default()));
		let backend = factory(&storage_config).map_err(|e| {
			tracing::error!(
				component = "storage",
				implementation = %primary,
				error = %e,
				"Failed to create storage backend"
			);
			ManagerError::Config(format!(
				"Failed to create storage backend '{}': {}",
				primary, e
			))
		})?;
		let storage = Arc::new(StorageService::new(backend));
		info!(component = "storage", implementation = %primary, "Loaded");

		if self.config.service.platform_secret.is_empty() {
			return Err(ManagerError::Config("platform_secret is empty".into()));
		}
		let wallets = WalletDeriver::new(self.config.service.platform_secret.clone());
		let nft_bytecode = self
			.config
			.service
			.nft_contract_bytecode
			.as_deref()
			.map(parse_bytecode)
			.transpose()?;

		let factory = Arc::new(EvmChainFactory::new(
			self.config.rpc.clone(),
			&self.config.watcher,
			wallets.clone(),
			TrackedSet::new(
				storage.clone(),
				Duration::from_secs(self.config.watcher.tracked_ttl_seconds),
			),
			repos.clone(),
			self.connector,
			shutdown,
		));
		let manager = Arc::new(PayoutManager::new(
			repos,
			factory.clone(),
			Duration::from_secs(self.config.service.scan_interval_seconds),
			Duration::from_secs(self.config.service.stale_after_seconds),
		));
		let facade = Arc::new(PayoutFacade::new(
			manager.clone(),
			wallets,
			self.config.service.deployer_wallet_nonce.clone(),
			nft_bytecode,
		));
		info!(
			service_id = %self.config.service.id,
			scan_interval_secs = self.config.service.scan_interval_seconds,
			"Payout engine built"
		);

		Ok(PayoutEngine {
			manager,
			facade,
			storage,
			factory,
			cleanup_interval: Duration::from_secs(self.config.storage.cleanup_interval_seconds),
		})
	}
}

fn parse_bytecode(hex_code: &str) -> Result<Bytes, ManagerError> {
	hex::decode(without_0x_prefix(hex_code.trim()))
		.map(Bytes::from)
		.map_err(|e| ManagerError::Config(format!("Invalid NFT contract bytecode: {}", e)))
}
