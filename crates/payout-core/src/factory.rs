//! Construction of the per-chain EVM stack.

use crate::registry::{ChainFactory, ChainHandle};
use crate::ManagerError;
use async_trait::async_trait;
use payout_account::WalletDeriver;
use payout_config::{RpcConfig, WatcherConfig};
use payout_delivery::{
	ChainClient, ChainlistDiscovery, EvmClient, EvmDispatcher, PoolSettings, RpcConnector,
	RpcDiscovery, RpcPool,
};
use payout_storage::Repositories;
use payout_types::Chain;
use payout_watcher::{EvmWatcher, TrackedSet, WatcherSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

/// Pipeline settings from configuration. Receipt lookups share the RPC
/// request timeout.
fn watcher_settings(config: &WatcherConfig, receipt_timeout: Duration) -> WatcherSettings {
	WatcherSettings {
		min_wait: Duration::from_millis(config.min_wait_ms),
		max_wait: Duration::from_millis(config.max_wait_ms),
		receipt_max_attempts: config.receipt_max_attempts,
		receipt_backoff: Duration::from_secs(config.receipt_backoff_seconds),
		receipt_timeout,
		receipt_queue_capacity: config.receipt_queue_capacity,
		block_queue_capacity: config.block_queue_capacity,
		update_queue_capacity: config.update_queue_capacity,
	}
}

/// Creates an RPC pool, client, dispatcher and running watcher per chain.
///
/// Background tasks are started under the shared shutdown signal; their
/// handles are kept so the service can wait for them on exit.
pub struct EvmChainFactory {
	rpc: RpcConfig,
	watcher: WatcherSettings,
	wallets: WalletDeriver,
	tracked: TrackedSet,
	repos: Repositories,
	connector: Arc<dyn RpcConnector>,
	shutdown: watch::Receiver<bool>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EvmChainFactory {
	pub fn new(
		rpc: RpcConfig,
		watcher: &WatcherConfig,
		wallets: WalletDeriver,
		tracked: TrackedSet,
		repos: Repositories,
		connector: Arc<dyn RpcConnector>,
		shutdown: watch::Receiver<bool>,
	) -> Self {
		let watcher = watcher_settings(watcher, rpc.request_timeout());
		Self {
			rpc,
			watcher,
			wallets,
			tracked,
			repos,
			connector,
			shutdown,
			tasks: Mutex::new(Vec::new()),
		}
	}

	/// Handles of every background task started so far.
	pub async fn take_tasks(&self) -> Vec<JoinHandle<()>> {
		std::mem::take(&mut *self.tasks.lock().await)
	}

	fn discovery(&self, chain: &Chain) -> Result<Option<Arc<dyn RpcDiscovery>>, ManagerError> {
		if !chain.use_external_rpc || self.rpc.external_rpc_url.is_empty() {
			return Ok(None);
		}
		let discovery = ChainlistDiscovery::new(&self.rpc.external_rpc_url, self.rpc.probe_timeout())?;
		Ok(Some(Arc::new(discovery)))
	}
}

#[async_trait]
impl ChainFactory for EvmChainFactory {
	async fn create(&self, chain: &Chain) -> Result<ChainHandle, ManagerError> {
		let discovery = self.discovery(chain)?;
		if chain.rpc_urls.is_empty() && discovery.is_none() {
			return Err(ManagerError::Config(format!(
				"Chain {} has no RPC endpoints",
				chain.name
			)));
		}

		let pool = Arc::new(RpcPool::new(
			chain.clone(),
			self.connector.clone(),
			discovery,
			PoolSettings {
				probe_timeout: self.rpc.probe_timeout(),
				height_tolerance: self.rpc.height_tolerance,
			},
		));
		let client: Arc<dyn ChainClient> = Arc::new(EvmClient::new(
			chain.clone(),
			pool.clone(),
			self.wallets.clone(),
			self.rpc.request_timeout(),
		));
		let dispatcher = Arc::new(EvmDispatcher::new(client.clone()));
		let watcher = Arc::new(EvmWatcher::new(
			chain.clone(),
			client.clone(),
			self.tracked.clone(),
			self.repos.transactions.clone(),
			self.repos.rewards.clone(),
			self.watcher,
		));

		let mut tasks = watcher.clone().spawn(self.shutdown.clone());
		tasks.push(tokio::spawn(pool.run_refresh_loop(
			self.rpc.health_check_interval(),
			self.shutdown.clone(),
		)));
		self.tasks.lock().await.extend(tasks);

		info!(
			chain = %chain.name,
			static_rpcs = chain.rpc_urls.len(),
			external_discovery = chain.use_external_rpc,
			"Chain stack started"
		);
		Ok(ChainHandle {
			chain: chain.clone(),
			client,
			dispatcher,
			watcher,
		})
	}
}
