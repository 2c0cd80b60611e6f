//! Confirmation tracking for dispatched payouts.
//!
//! Each chain runs one pipeline: the block fetcher walks the chain at an
//! adaptive pace, the block-wait loop filters each block against the set of
//! tracked hashes, the receipt fetcher resolves matches to receipts, and the
//! reconciliation loop writes the outcome back to the ledger.

use alloy::primitives::B256;
use async_trait::async_trait;
use payout_delivery::DeliveryError;
use payout_storage::{RepositoryError, StorageError, StorageService};
use payout_types::{format_hash, TrackUpdate};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod block_fetcher;
pub mod receipt_fetcher;
pub mod watcher;

pub use block_fetcher::BlockFetcher;
pub use receipt_fetcher::{ReceiptFetcher, ReceiptRequest, ReceiptResponse};
pub use watcher::EvmWatcher;

/// Cache namespace of the tracked-transaction set.
pub const TRACKED_TX_NAMESPACE: &str = "tracked_tx";

#[derive(Debug, Error)]
pub enum WatcherError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Repository error: {0}")]
	Repository(String),
	#[error("Delivery error: {0}")]
	Delivery(String),
	#[error("Serialization error: {0}")]
	Serialization(String),
}

impl From<StorageError> for WatcherError {
	fn from(e: StorageError) -> Self {
		Self::Storage(e.to_string())
	}
}

impl From<RepositoryError> for WatcherError {
	fn from(e: RepositoryError) -> Self {
		Self::Repository(e.to_string())
	}
}

impl From<DeliveryError> for WatcherError {
	fn from(e: DeliveryError) -> Self {
		Self::Delivery(e.to_string())
	}
}

/// Watcher operations used by the manager.
#[async_trait]
pub trait WatcherInterface: Send + Sync {
	/// Registers a dispatched transaction so the pipeline picks it up when it
	/// appears in a block.
	async fn track_tx(&self, hash: B256) -> Result<(), WatcherError>;

	/// Applies one confirmation outcome to the ledger.
	async fn reconcile(&self, update: TrackUpdate) -> Result<(), WatcherError>;
}

/// Pipeline tuning shared by every chain.
#[derive(Debug, Clone, Copy)]
pub struct WatcherSettings {
	pub min_wait: Duration,
	pub max_wait: Duration,
	pub receipt_max_attempts: u32,
	pub receipt_backoff: Duration,
	/// Per-attempt bound on a receipt lookup.
	pub receipt_timeout: Duration,
	pub receipt_queue_capacity: usize,
	pub block_queue_capacity: usize,
	pub update_queue_capacity: usize,
}

impl Default for WatcherSettings {
	fn default() -> Self {
		Self {
			min_wait: Duration::from_millis(500),
			max_wait: Duration::from_secs(60),
			receipt_max_attempts: 5,
			receipt_backoff: Duration::from_secs(5),
			receipt_timeout: Duration::from_secs(5),
			receipt_queue_capacity: 20,
			block_queue_capacity: 64,
			update_queue_capacity: 64,
		}
	}
}

/// Membership set of transactions awaiting confirmation, kept in the shared
/// cache under `tracked_tx:<chain>:<hash>`.
///
/// Entries expire after `ttl` so hashes that never show up in a scanned
/// block, such as those settled by the stale sweep, do not accumulate.
#[derive(Clone)]
pub struct TrackedSet {
	storage: Arc<StorageService>,
	ttl: Duration,
}

impl TrackedSet {
	pub fn new(storage: Arc<StorageService>, ttl: Duration) -> Self {
		Self { storage, ttl }
	}

	fn id(chain: &str, hash: &B256) -> String {
		format!("{}:{}", chain, format_hash(hash))
	}

	pub async fn track(&self, chain: &str, hash: &B256) -> Result<(), StorageError> {
		self.storage
			.store_with_ttl(TRACKED_TX_NAMESPACE, &Self::id(chain, hash), &true, Some(self.ttl))
			.await
	}

	pub async fn contains(&self, chain: &str, hash: &B256) -> Result<bool, StorageError> {
		self.storage
			.exists(TRACKED_TX_NAMESPACE, &Self::id(chain, hash))
			.await
	}

	/// Removes `hash` and reports whether it was tracked.
	pub async fn take(&self, chain: &str, hash: &B256) -> Result<bool, StorageError> {
		self.storage
			.take(TRACKED_TX_NAMESPACE, &Self::id(chain, hash))
			.await
	}
}
