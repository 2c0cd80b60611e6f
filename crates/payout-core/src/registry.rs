//! Active chains and how they are brought online.

use crate::ManagerError;
use async_trait::async_trait;
use payout_delivery::{ChainClient, DispatcherInterface};
use payout_types::Chain;
use payout_watcher::WatcherInterface;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Everything the manager needs to pay out on one chain.
pub struct ChainHandle {
	pub chain: Chain,
	pub client: Arc<dyn ChainClient>,
	pub dispatcher: Arc<dyn DispatcherInterface>,
	pub watcher: Arc<dyn WatcherInterface>,
}

/// Creates the client, dispatcher and running watcher for a chain.
#[async_trait]
pub trait ChainFactory: Send + Sync {
	async fn create(&self, chain: &Chain) -> Result<ChainHandle, ManagerError>;
}

/// Chains that have been brought online, keyed by name.
///
/// A chain is created at most once; handles are never removed.
#[derive(Default)]
pub struct ChainRegistry {
	handles: RwLock<HashMap<String, Arc<ChainHandle>>>,
	creating: Mutex<()>,
}

impl ChainRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn get(&self, name: &str) -> Option<Arc<ChainHandle>> {
		self.handles.read().await.get(name).cloned()
	}

	pub async fn names(&self) -> Vec<String> {
		let mut names: Vec<_> = self.handles.read().await.keys().cloned().collect();
		names.sort();
		names
	}

	/// Returns the handle for `chain`, creating it through `factory` if the
	/// chain is not active yet.
	pub async fn get_or_create(
		&self,
		chain: &Chain,
		factory: &dyn ChainFactory,
	) -> Result<Arc<ChainHandle>, ManagerError> {
		if let Some(handle) = self.get(&chain.name).await {
			return Ok(handle);
		}

		let _guard = self.creating.lock().await;
		if let Some(handle) = self.get(&chain.name).await {
			return Ok(handle);
		}

		let handle = Arc::new(factory.create(chain).await?);
		self.handles
			.write()
			.await
			.insert(chain.name.clone(), handle.clone());
		info!(chain = %chain.name, chain_id = chain.id, "Chain activated");
		Ok(handle)
	}
}
