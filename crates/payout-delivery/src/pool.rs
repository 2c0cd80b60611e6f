//! Per-chain pool of RPC endpoints filtered by block-height consensus.
//!
//! A health check probes every candidate URL concurrently, takes the median
//! reported height and marks as healthy only the endpoints within a fixed
//! tolerance of it. The result is published as one immutable snapshot; a
//! refresh swaps the `Arc`, so callers still holding a client from the
//! previous snapshot keep it alive until they are done with it.

use crate::{DeliveryError, RpcConnector, RpcDiscovery, RpcEndpoint};
use futures::future::join_all;
use payout_types::Chain;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// Health check tuning.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
	pub probe_timeout: Duration,
	/// Maximum distance, in blocks, from the median height.
	pub height_tolerance: u64,
}

impl Default for PoolSettings {
	fn default() -> Self {
		Self {
			probe_timeout: Duration::from_secs(5),
			height_tolerance: 5,
		}
	}
}

struct PoolEntry {
	url: String,
	client: Arc<dyn RpcEndpoint>,
	healthy: bool,
}

/// Endpoints and their health as of one health check.
struct EndpointSet {
	entries: Vec<PoolEntry>,
}

pub struct RpcPool {
	chain: Chain,
	connector: Arc<dyn RpcConnector>,
	discovery: Option<Arc<dyn RpcDiscovery>>,
	settings: PoolSettings,
	snapshot: RwLock<Option<Arc<EndpointSet>>>,
	/// Serialises health checks so concurrent first use probes only once.
	refresh_guard: Mutex<()>,
}

impl RpcPool {
	pub fn new(
		chain: Chain,
		connector: Arc<dyn RpcConnector>,
		discovery: Option<Arc<dyn RpcDiscovery>>,
		settings: PoolSettings,
	) -> Self {
		Self {
			chain,
			connector,
			discovery,
			settings,
			snapshot: RwLock::new(None),
			refresh_guard: Mutex::new(()),
		}
	}

	pub fn chain(&self) -> &Chain {
		&self.chain
	}

	/// Runs a health check and publishes the result. Returns the number of
	/// healthy endpoints.
	pub async fn refresh(&self) -> usize {
		let _guard = self.refresh_guard.lock().await;
		self.refresh_locked().await
	}

	/// Returns a random healthy endpoint, running the first health check if
	/// none has run yet.
	pub async fn healthy_client(&self) -> Result<Arc<dyn RpcEndpoint>, DeliveryError> {
		let snapshot = match self.current().await {
			Some(snapshot) => snapshot,
			None => self.initialize().await,
		};

		let mut order: Vec<usize> = (0..snapshot.entries.len()).collect();
		order.shuffle(&mut rand::thread_rng());

		order
			.into_iter()
			.map(|i| &snapshot.entries[i])
			.find(|entry| entry.healthy)
			.map(|entry| entry.client.clone())
			.ok_or_else(|| DeliveryError::NoHealthyRpc(self.chain.name.clone()))
	}

	/// URLs currently marked healthy, in candidate order.
	pub async fn healthy_urls(&self) -> Vec<String> {
		match self.current().await {
			Some(snapshot) => snapshot
				.entries
				.iter()
				.filter(|e| e.healthy)
				.map(|e| e.url.clone())
				.collect(),
			None => Vec::new(),
		}
	}

	/// Refreshes the pool every `interval` until shutdown is signalled.
	pub async fn run_refresh_loop(
		self: Arc<Self>,
		interval: Duration,
		mut shutdown: watch::Receiver<bool>,
	) {
		loop {
			tokio::select! {
				_ = tokio::time::sleep(interval) => {
					self.refresh().await;
				}
				_ = shutdown.changed() => {
					debug!(chain = %self.chain.name, "RPC refresh loop stopping");
					break;
				}
			}
		}
	}

	async fn current(&self) -> Option<Arc<EndpointSet>> {
		self.snapshot.read().await.clone()
	}

	async fn initialize(&self) -> Arc<EndpointSet> {
		let _guard = self.refresh_guard.lock().await;
		// Another caller may have finished the first check while we waited.
		if let Some(snapshot) = self.current().await {
			return snapshot;
		}
		self.refresh_locked().await;
		self.current()
			.await
			.unwrap_or_else(|| Arc::new(EndpointSet { entries: Vec::new() }))
	}

	#[instrument(skip_all, fields(chain = %self.chain.name))]
	async fn refresh_locked(&self) -> usize {
		let candidates = self.candidates().await;

		let endpoints: Vec<(String, Arc<dyn RpcEndpoint>)> = candidates
			.into_iter()
			.filter_map(|url| match self.connector.connect(&url) {
				Ok(client) => Some((url, client)),
				Err(e) => {
					warn!(url = %url, error = %e, "Failed to connect to RPC");
					None
				},
			})
			.collect();

		let timeout = self.settings.probe_timeout;
		let heights = join_all(endpoints.iter().map(|(url, client)| async move {
			match tokio::time::timeout(timeout, client.latest_block_height()).await {
				Ok(Ok(Some(height))) => Some(height),
				Ok(Ok(None)) => {
					debug!(url = %url, "RPC returned no latest block");
					None
				},
				Ok(Err(e)) => {
					debug!(url = %url, error = %e, "RPC probe failed");
					None
				},
				Err(_) => {
					debug!(url = %url, "RPC probe timed out");
					None
				},
			}
		}))
		.await;

		let healthy = select_healthy(&heights, self.settings.height_tolerance);
		let healthy_count = healthy.iter().filter(|h| **h).count();

		let entries = endpoints
			.into_iter()
			.zip(healthy)
			.map(|((url, client), healthy)| PoolEntry {
				url,
				client,
				healthy,
			})
			.collect::<Vec<_>>();
		let total = entries.len();

		let previous = self
			.snapshot
			.write()
			.await
			.replace(Arc::new(EndpointSet { entries }));
		drop(previous);

		if healthy_count == 0 {
			warn!(candidates = total, "No healthy RPC endpoints");
		} else {
			info!(healthy = healthy_count, candidates = total, "RPC pool refreshed");
		}
		healthy_count
	}

	async fn candidates(&self) -> Vec<String> {
		let mut urls = self.chain.rpc_urls.clone();

		if self.chain.use_external_rpc {
			if let Some(discovery) = &self.discovery {
				match discovery.discover(self.chain.id).await {
					Ok(found) => urls.extend(found),
					Err(e) => warn!(error = %e, "External RPC discovery failed"),
				}
			}
		}

		let mut seen = HashSet::new();
		urls.retain(|url| seen.insert(url.trim_end_matches('/').to_string()));
		urls
	}
}

/// Marks as healthy every probe whose height is within `tolerance` blocks
/// of the median of the successful probes.
fn select_healthy(heights: &[Option<u64>], tolerance: u64) -> Vec<bool> {
	let mut sorted: Vec<u64> = heights.iter().flatten().copied().collect();
	if sorted.is_empty() {
		return vec![false; heights.len()];
	}
	sorted.sort_unstable_by(|a, b| b.cmp(a));
	let median = sorted[sorted.len() / 2];

	heights
		.iter()
		.map(|h| h.is_some_and(|h| h.abs_diff(median) <= tolerance))
		.collect()
}
