//! Per-chain watcher: tracked-set filtering, receipt classification and
//! ledger reconciliation.

use crate::{
	BlockFetcher, ReceiptFetcher, ReceiptRequest, ReceiptResponse, TrackedSet, WatcherError,
	WatcherInterface, WatcherSettings,
};
use alloy::primitives::B256;
use async_trait::async_trait;
use payout_delivery::ChainClient;
use payout_storage::{RepositoryError, RewardRepository, TransactionRepository};
use payout_types::{
	format_hash, BlockInfo, Chain, RewardStatus, TrackResult, TrackUpdate, TransactionStatus,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

pub struct EvmWatcher {
	chain: Chain,
	client: Arc<dyn ChainClient>,
	tracked: TrackedSet,
	transactions: Arc<dyn TransactionRepository>,
	rewards: Arc<dyn RewardRepository>,
	settings: WatcherSettings,
}

impl EvmWatcher {
	pub fn new(
		chain: Chain,
		client: Arc<dyn ChainClient>,
		tracked: TrackedSet,
		transactions: Arc<dyn TransactionRepository>,
		rewards: Arc<dyn RewardRepository>,
		settings: WatcherSettings,
	) -> Self {
		Self {
			chain,
			client,
			tracked,
			transactions,
			rewards,
			settings,
		}
	}

	pub fn chain(&self) -> &Chain {
		&self.chain
	}

	/// Starts the block fetcher, the receipt fetcher and the three watcher
	/// loops. Every task exits when `shutdown` flips.
	pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
		let (block_tx, block_rx) = mpsc::channel(self.settings.block_queue_capacity.max(1));
		let (request_tx, request_rx) = mpsc::channel(self.settings.receipt_queue_capacity.max(1));
		let (response_tx, response_rx) = mpsc::channel(self.settings.receipt_queue_capacity.max(1));
		let (update_tx, update_rx) = mpsc::channel(self.settings.update_queue_capacity.max(1));

		let block_fetcher = BlockFetcher::new(self.chain.clone(), self.client.clone(), &self.settings);
		let receipt_fetcher = ReceiptFetcher::new(
			self.client.clone(),
			self.settings.receipt_max_attempts,
			self.settings.receipt_backoff,
			self.settings.receipt_timeout,
		);

		info!(chain = %self.chain.name, "Starting watcher");
		vec![
			tokio::spawn(block_fetcher.run(block_tx, shutdown.clone())),
			tokio::spawn(receipt_fetcher.run(request_rx, response_tx, shutdown.clone())),
			tokio::spawn(self.clone().block_wait_loop(block_rx, request_tx, shutdown.clone())),
			tokio::spawn(self.clone().receipt_wait_loop(response_rx, update_tx, shutdown.clone())),
			tokio::spawn(self.reconciliation_loop(update_rx, shutdown)),
		]
	}

	/// Removes the tracked transactions of `block` from the set and returns
	/// them as a receipt request, or `None` if nothing in the block is
	/// tracked.
	pub async fn filter_block(&self, block: BlockInfo) -> Option<ReceiptRequest> {
		let mut matched = Vec::new();
		for tx in block.transactions {
			match self.tracked.take(&self.chain.name, &tx.hash).await {
				Ok(true) => matched.push(tx),
				Ok(false) => {},
				Err(e) => {
					warn!(chain = %self.chain.name, tx_hash = %format_hash(&tx.hash), error = %e, "Tracked-set lookup failed");
				},
			}
		}

		if matched.is_empty() {
			return None;
		}
		debug!(chain = %self.chain.name, block = block.number, matched = matched.len(), "Tracked transactions in block");
		Some(ReceiptRequest {
			block_number: block.number,
			block_hash: block.hash,
			transactions: matched,
		})
	}

	/// Turns a receipt response into one update per transaction.
	pub fn classify(&self, response: ReceiptResponse) -> Vec<TrackUpdate> {
		response
			.transactions
			.into_iter()
			.zip(response.receipts)
			.filter_map(|(tx, receipt)| {
				let payload = match serde_json::to_vec(&tx) {
					Ok(payload) => payload,
					Err(e) => {
						error!(tx_hash = %format_hash(&tx.hash), error = %e, "Failed to serialize transaction");
						return None;
					},
				};
				Some(TrackUpdate {
					chain: self.chain.name.clone(),
					hash: tx.hash,
					block_height: response.block_number,
					result: if receipt.success {
						TrackResult::Confirmed
					} else {
						TrackResult::Failed
					},
					payload,
				})
			})
			.collect()
	}

	#[instrument(skip_all, fields(chain = %self.chain.name))]
	async fn block_wait_loop(
		self: Arc<Self>,
		mut blocks: mpsc::Receiver<BlockInfo>,
		requests: mpsc::Sender<ReceiptRequest>,
		mut shutdown: watch::Receiver<bool>,
	) {
		loop {
			let block = tokio::select! {
				block = blocks.recv() => match block {
					Some(block) => block,
					None => return,
				},
				_ = shutdown.changed() => return,
			};

			if let Some(request) = self.filter_block(block).await {
				tokio::select! {
					sent = requests.send(request) => {
						if sent.is_err() {
							return;
						}
					}
					_ = shutdown.changed() => return,
				}
			}
		}
	}

	#[instrument(skip_all, fields(chain = %self.chain.name))]
	async fn receipt_wait_loop(
		self: Arc<Self>,
		mut responses: mpsc::Receiver<ReceiptResponse>,
		updates: mpsc::Sender<TrackUpdate>,
		mut shutdown: watch::Receiver<bool>,
	) {
		loop {
			let response = tokio::select! {
				response = responses.recv() => match response {
					Some(response) => response,
					None => return,
				},
				_ = shutdown.changed() => return,
			};

			for update in self.classify(response) {
				tokio::select! {
					sent = updates.send(update) => {
						if sent.is_err() {
							return;
						}
					}
					_ = shutdown.changed() => return,
				}
			}
		}
	}

	#[instrument(skip_all, fields(chain = %self.chain.name))]
	async fn reconciliation_loop(
		self: Arc<Self>,
		mut updates: mpsc::Receiver<TrackUpdate>,
		mut shutdown: watch::Receiver<bool>,
	) {
		loop {
			let update = tokio::select! {
				update = updates.recv() => match update {
					Some(update) => update,
					None => return,
				},
				_ = shutdown.changed() => return,
			};

			let hash = update.hash;
			if let Err(e) = self.reconcile(update).await {
				error!(tx_hash = %format_hash(&hash), error = %e, "Failed to reconcile transaction");
			}
		}
	}

	/// A failed update is only trusted after a direct receipt lookup agrees.
	async fn confirm_failure(&self, hash: B256) -> bool {
		match self.client.transaction_receipt(hash).await {
			Ok(Some(receipt)) => !receipt.success,
			Ok(None) => true,
			Err(e) => {
				warn!(tx_hash = %format_hash(&hash), error = %e, "Confirmation receipt lookup failed");
				true
			},
		}
	}
}

#[async_trait]
impl WatcherInterface for EvmWatcher {
	async fn track_tx(&self, hash: B256) -> Result<(), WatcherError> {
		self.tracked.track(&self.chain.name, &hash).await?;
		debug!(chain = %self.chain.name, tx_hash = %format_hash(&hash), "Tracking transaction");
		Ok(())
	}

	async fn reconcile(&self, update: TrackUpdate) -> Result<(), WatcherError> {
		let record = match self.transactions.get_by_hash(&update.chain, &update.hash).await {
			Ok(record) => record,
			Err(RepositoryError::NotFound(_)) => {
				warn!(
					chain = %update.chain,
					tx_hash = %format_hash(&update.hash),
					"No transaction record for observed hash"
				);
				return Ok(());
			},
			Err(e) => return Err(e.into()),
		};

		if record.status != TransactionStatus::InProgress {
			debug!(tx_hash = %format_hash(&update.hash), status = ?record.status, "Transaction already settled");
			return Ok(());
		}

		let succeeded = match update.result {
			TrackResult::Confirmed => true,
			TrackResult::Failed => !self.confirm_failure(update.hash).await,
		};
		let (tx_status, reward_status) = if succeeded {
			(TransactionStatus::Success, RewardStatus::Received)
		} else {
			(TransactionStatus::Failure, RewardStatus::Failed)
		};

		self.transactions
			.update_status(&record.id, tx_status, Some(update.block_height))
			.await?;
		let rewards = self
			.rewards
			.update_status_by_transaction(&record.id, reward_status)
			.await?;
		// Settled outside the block scan, e.g. by the stale sweep.
		if let Err(e) = self.tracked.take(&update.chain, &update.hash).await {
			warn!(tx_hash = %format_hash(&update.hash), error = %e, "Failed to untrack transaction");
		}

		info!(
			chain = %update.chain,
			tx_hash = %format_hash(&update.hash),
			block = update.block_height,
			status = ?tx_status,
			rewards,
			"Transaction reconciled"
		);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::{Address, Bytes, U256};
	use payout_delivery::MockChainClient;
	use payout_storage::implementations::ledger::MemoryLedger;
	use payout_storage::implementations::memory::MemoryStorage;
	use payout_storage::{Ledger, LedgerTransaction, StorageService};
	use payout_types::{BlockchainTransaction, ObservedTx, PendingReward, ReceiptInfo, TokenRef};
	use rust_decimal::Decimal;
	use std::time::Duration;

	fn chain() -> Chain {
		Chain {
			name: "testchain".into(),
			id: 31337,
			block_time_ms: 1000,
			adjust_time_ms: 1000,
			threshold: 0,
			use_external_rpc: false,
			rpc_urls: vec![],
			eip1559: true,
			nft_contract: None,
			tokens: vec![],
		}
	}

	fn observed(hash: B256) -> ObservedTx {
		ObservedTx {
			hash,
			from: Address::ZERO,
			to: Some(Address::repeat_byte(0x11)),
			value: U256::ZERO,
			input: Bytes::new(),
		}
	}

	fn receipt(hash: B256, success: bool) -> ReceiptInfo {
		ReceiptInfo {
			tx_hash: hash,
			block_number: 42,
			success,
			gas_used: 50_000,
			contract_address: None,
		}
	}

	fn reward(id: &str) -> PendingReward {
		PendingReward {
			id: id.into(),
			community_id: "community".into(),
			recipient: Address::repeat_byte(0x11),
			amount: Decimal::ONE,
			token: Some(TokenRef {
				chain: "testchain".into(),
				address: Address::repeat_byte(0x22),
			}),
			nft_id: None,
			transaction_id: None,
			status: RewardStatus::Pending,
		}
	}

	fn watcher(client: MockChainClient, ledger: &Arc<MemoryLedger>) -> EvmWatcher {
		let repos = ledger.repositories();
		EvmWatcher::new(
			chain(),
			Arc::new(client),
			TrackedSet::new(
				Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
				Duration::from_secs(60),
			),
			repos.transactions,
			repos.rewards,
			WatcherSettings::default(),
		)
	}

	/// Inserts an in-progress transaction linked to one reward.
	async fn dispatched(ledger: &Arc<MemoryLedger>, hash: B256) -> BlockchainTransaction {
		ledger.insert_reward(reward("r1")).await;
		let record = BlockchainTransaction::new("testchain", hash);
		let mut tx = ledger.begin().await.unwrap();
		tx.insert_transaction(&record).await.unwrap();
		tx.update_transaction_link_by_ids(&["r1".to_string()], &record.id)
			.await
			.unwrap();
		tx.commit().await.unwrap();
		record
	}

	#[tokio::test]
	async fn test_tracked_hash_matches_exactly_once() {
		let ledger = Arc::new(MemoryLedger::new());
		let watcher = watcher(MockChainClient::new(), &ledger);
		let tracked = B256::repeat_byte(1);
		let other = B256::repeat_byte(2);
		watcher.track_tx(tracked).await.unwrap();

		let block = BlockInfo {
			number: 7,
			hash: B256::repeat_byte(0xbb),
			transactions: vec![observed(other), observed(tracked)],
		};

		let request = watcher.filter_block(block.clone()).await.unwrap();
		assert_eq!(request.block_number, 7);
		assert_eq!(request.transactions.len(), 1);
		assert_eq!(request.transactions[0].hash, tracked);
		assert!(!watcher.tracked.contains("testchain", &tracked).await.unwrap());

		// The same block observed again yields nothing.
		assert!(watcher.filter_block(block).await.is_none());
	}

	#[tokio::test]
	async fn test_classify_by_receipt_status() {
		let ledger = Arc::new(MemoryLedger::new());
		let watcher = watcher(MockChainClient::new(), &ledger);
		let ok = B256::repeat_byte(1);
		let reverted = B256::repeat_byte(2);

		let updates = watcher.classify(ReceiptResponse {
			block_number: 42,
			block_hash: B256::ZERO,
			transactions: vec![observed(ok), observed(reverted)],
			receipts: vec![receipt(ok, true), receipt(reverted, false)],
		});

		assert_eq!(updates.len(), 2);
		assert_eq!(updates[0].result, TrackResult::Confirmed);
		assert_eq!(updates[1].result, TrackResult::Failed);
		assert_eq!(updates[1].block_height, 42);
		let decoded: ObservedTx = serde_json::from_slice(&updates[0].payload).unwrap();
		assert_eq!(decoded.hash, ok);
	}

	#[tokio::test]
	async fn test_reconcile_confirmed_marks_success_and_rewards_received() {
		let ledger = Arc::new(MemoryLedger::new());
		let hash = B256::repeat_byte(1);
		let record = dispatched(&ledger, hash).await;
		let mut client = MockChainClient::new();
		client.expect_transaction_receipt().never();
		let watcher = watcher(client, &ledger);
		watcher.track_tx(hash).await.unwrap();

		watcher
			.reconcile(TrackUpdate {
				chain: "testchain".into(),
				hash,
				block_height: 42,
				result: TrackResult::Confirmed,
				payload: vec![],
			})
			.await
			.unwrap();

		let stored = ledger
			.transactions()
			.await
			.into_iter()
			.find(|t| t.id == record.id)
			.unwrap();
		assert_eq!(stored.status, TransactionStatus::Success);
		assert_eq!(stored.block_height, Some(42));
		assert_eq!(ledger.reward("r1").await.unwrap().status, RewardStatus::Received);
		assert!(!watcher.tracked.contains("testchain", &hash).await.unwrap());
	}

	#[tokio::test]
	async fn test_reverted_receipt_marks_failure() {
		let ledger = Arc::new(MemoryLedger::new());
		let hash = B256::repeat_byte(3);
		dispatched(&ledger, hash).await;
		let mut client = MockChainClient::new();
		client
			.expect_transaction_receipt()
			.times(1)
			.returning(|h| Ok(Some(receipt(h, false))));
		let watcher = watcher(client, &ledger);

		watcher
			.reconcile(TrackUpdate {
				chain: "testchain".into(),
				hash,
				block_height: 42,
				result: TrackResult::Failed,
				payload: vec![],
			})
			.await
			.unwrap();

		let stored = ledger.transactions().await.pop().unwrap();
		assert_eq!(stored.status, TransactionStatus::Failure);
		assert_eq!(ledger.reward("r1").await.unwrap().status, RewardStatus::Failed);
	}

	#[tokio::test]
	async fn test_failed_update_overridden_by_successful_receipt() {
		let ledger = Arc::new(MemoryLedger::new());
		let hash = B256::repeat_byte(4);
		dispatched(&ledger, hash).await;
		let mut client = MockChainClient::new();
		client
			.expect_transaction_receipt()
			.returning(|h| Ok(Some(receipt(h, true))));
		let watcher = watcher(client, &ledger);

		watcher
			.reconcile(TrackUpdate {
				chain: "testchain".into(),
				hash,
				block_height: 42,
				result: TrackResult::Failed,
				payload: vec![],
			})
			.await
			.unwrap();

		assert_eq!(
			ledger.transactions().await.pop().unwrap().status,
			TransactionStatus::Success
		);
	}

	#[tokio::test]
	async fn test_reconcile_unknown_and_settled_are_noops() {
		let ledger = Arc::new(MemoryLedger::new());
		let hash = B256::repeat_byte(5);
		let record = dispatched(&ledger, hash).await;
		let repos = ledger.repositories();
		repos
			.transactions
			.update_status(&record.id, TransactionStatus::Success, Some(1))
			.await
			.unwrap();
		let watcher = watcher(MockChainClient::new(), &ledger);

		let update = |hash| TrackUpdate {
			chain: "testchain".into(),
			hash,
			block_height: 99,
			result: TrackResult::Failed,
			payload: vec![],
		};
		watcher.reconcile(update(B256::repeat_byte(0xee))).await.unwrap();
		watcher.reconcile(update(hash)).await.unwrap();

		let stored = ledger.transactions().await.pop().unwrap();
		assert_eq!(stored.status, TransactionStatus::Success);
		assert_eq!(stored.block_height, Some(1));
	}

	#[tokio::test(start_paused = true)]
	async fn test_pipeline_settles_tracked_transaction() {
		let ledger = Arc::new(MemoryLedger::new());
		let hash = B256::repeat_byte(6);
		dispatched(&ledger, hash).await;

		let mut client = MockChainClient::new();
		client.expect_block_number().returning(|| Ok(10));
		client.expect_block_at().returning(move |h| {
			Ok(BlockInfo {
				number: h,
				hash: B256::with_last_byte(h as u8),
				transactions: if h == 11 { vec![observed(hash)] } else { vec![] },
			})
		});
		client
			.expect_transaction_receipt()
			.returning(|h| Ok(Some(receipt(h, true))));
		let watcher = Arc::new(watcher(client, &ledger));
		watcher.track_tx(hash).await.unwrap();

		let (stop, shutdown) = watch::channel(false);
		let handles = watcher.clone().spawn(shutdown);

		let mut settled = false;
		for _ in 0..100 {
			tokio::time::sleep(Duration::from_millis(500)).await;
			if ledger.reward("r1").await.unwrap().status == RewardStatus::Received {
				settled = true;
				break;
			}
		}
		assert!(settled);

		stop.send(true).unwrap();
		for handle in handles {
			handle.await.unwrap();
		}
	}
}
