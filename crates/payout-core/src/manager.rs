//! The payout manager loop.

use crate::batching::{group_rewards, FungibleBatch, NftBatch, NonceResolver};
use crate::registry::{ChainFactory, ChainHandle, ChainRegistry};
use crate::ManagerError;
use alloy::consensus::TxEnvelope;
use alloy::primitives::{Bytes, B256};
use payout_delivery::{DispatchRequest, NftMint};
use payout_storage::{LedgerTransaction, Repositories};
use payout_types::{
	current_timestamp, format_hash, to_base_units, BlockchainTransaction, MintHistory,
	TrackResult, TrackUpdate,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// A transaction that was dispatched and committed to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
	pub transaction_id: String,
	pub tx_hash: B256,
}

pub struct PayoutManager {
	repos: Repositories,
	registry: Arc<ChainRegistry>,
	factory: Arc<dyn ChainFactory>,
	scan_interval: Duration,
	stale_after: Duration,
}

impl PayoutManager {
	pub fn new(
		repos: Repositories,
		factory: Arc<dyn ChainFactory>,
		scan_interval: Duration,
		stale_after: Duration,
	) -> Self {
		Self {
			repos,
			registry: Arc::new(ChainRegistry::new()),
			factory,
			scan_interval,
			stale_after,
		}
	}

	pub fn repositories(&self) -> &Repositories {
		&self.repos
	}

	pub fn registry(&self) -> &Arc<ChainRegistry> {
		&self.registry
	}

	/// The active handle for `name`.
	pub async fn chain(&self, name: &str) -> Result<Arc<ChainHandle>, ManagerError> {
		self.registry
			.get(name)
			.await
			.ok_or_else(|| ManagerError::UnknownChain(name.to_string()))
	}

	/// Runs payout cycles until shutdown is signalled.
	pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
		info!(interval_secs = self.scan_interval.as_secs(), "Payout manager started");
		loop {
			self.run_once().await;
			tokio::select! {
				_ = tokio::time::sleep(self.scan_interval) => {}
				_ = shutdown.changed() => {
					info!("Payout manager stopping");
					return;
				}
			}
		}
	}

	/// One full cycle: activate new chains, pay pending rewards, then sweep
	/// stale transactions. Each step fails independently.
	pub async fn run_once(&self) {
		if let Err(e) = self.sync_chains().await {
			error!(error = %e, "Failed to load chains");
		}
		if let Err(e) = self.process_pending().await {
			error!(error = %e, "Failed to process pending rewards");
		}
		if let Err(e) = self.sweep_stale().await {
			error!(error = %e, "Failed to sweep stale transactions");
		}
	}

	/// Brings every chain in the chain store online. Returns the number of
	/// active chains.
	pub async fn sync_chains(&self) -> Result<usize, ManagerError> {
		for chain in self.repos.chains.get_all().await? {
			if let Err(e) = self
				.registry
				.get_or_create(&chain, self.factory.as_ref())
				.await
			{
				error!(chain = %chain.name, error = %e, "Failed to activate chain");
			}
		}
		Ok(self.registry.names().await.len())
	}

	pub async fn process_pending(&self) -> Result<(), ManagerError> {
		let rewards = self.repos.rewards.get_all_pending().await?;
		if rewards.is_empty() {
			return Ok(());
		}

		let mut nonces = NonceResolver::new(self.repos.communities.clone());
		let mut nfts = HashMap::new();
		for reward in &rewards {
			if !nonces.resolved().contains_key(&reward.community_id) {
				if let Err(e) = nonces.resolve(&reward.community_id).await {
					error!(reward_id = %reward.id, community_id = %reward.community_id, error = %e, "Failed to resolve wallet nonce");
				}
			}
			if let Some(nft_id) = reward.nft_id.as_deref() {
				if !nfts.contains_key(nft_id) {
					match self.repos.nfts.get_by_id(nft_id).await {
						Ok(nft) => {
							nfts.insert(nft_id.to_string(), nft);
						},
						Err(e) => {
							error!(reward_id = %reward.id, nft_id, error = %e, "Failed to load NFT");
						},
					}
				}
			}
		}

		let batches = group_rewards(&rewards, nonces.resolved(), &nfts);
		debug!(
			rewards = rewards.len(),
			fungible = batches.fungible.len(),
			nft = batches.nft.len(),
			"Grouped pending rewards"
		);

		for batch in &batches.fungible {
			if let Err(e) = self.pay_fungible(batch).await {
				error!(chain = %batch.chain, rewards = ?batch.reward_ids, error = %e, "Token payout failed");
			}
		}
		for batch in &batches.nft {
			if let Err(e) = self.pay_nft(batch).await {
				error!(chain = %batch.chain, rewards = ?batch.reward_ids(), error = %e, "NFT payout failed");
			}
		}
		Ok(())
	}

	#[instrument(skip_all, fields(chain = %batch.chain, recipient = %batch.recipient, token = %batch.token))]
	async fn pay_fungible(&self, batch: &FungibleBatch) -> Result<DispatchOutcome, ManagerError> {
		let handle = self.chain(&batch.chain).await?;
		let token = self.repos.chains.get_token(&batch.chain, &batch.token).await?;
		let amount = to_base_units(batch.amount, token.decimals)
			.map_err(|e| ManagerError::InvalidReward(e.to_string()))?;

		let tx = handle
			.client
			.signed_transfer_token_tx(&batch.wallet_nonce, batch.token, batch.recipient, amount)
			.await?;
		self.execute(&handle, tx, &batch.reward_ids, Vec::new()).await
	}

	#[instrument(skip_all, fields(chain = %batch.chain, items = batch.items.len()))]
	async fn pay_nft(&self, batch: &NftBatch) -> Result<DispatchOutcome, ManagerError> {
		let handle = self.chain(&batch.chain).await?;
		let mut mints = Vec::with_capacity(batch.items.len());
		let mut history = Vec::with_capacity(batch.items.len());
		for item in &batch.items {
			let amount = to_base_units(item.amount, 0)
				.map_err(|e| ManagerError::InvalidReward(format!("{}: {}", item.reward_id, e)))?;
			mints.push(NftMint {
				recipient: item.recipient,
				token_id: item.token_id,
				amount,
			});
			history.push(MintHistory {
				nft_id: item.nft_id.clone(),
				transaction_id: String::new(),
				recipient: item.recipient,
				amount,
			});
		}

		let tx = handle
			.client
			.signed_mint_nft_tx(&batch.wallet_nonce, mints, Bytes::new())
			.await?;
		self.execute(&handle, tx, &batch.reward_ids(), history).await
	}

	/// Records, dispatches and tracks one signed transaction as a unit.
	///
	/// The transaction row, reward links and mint history are staged in one
	/// ledger transaction which is committed only after a successful
	/// dispatch. Any failure up to and including dispatch rolls it back.
	/// Mint history entries get their transaction id filled in here.
	pub async fn execute(
		&self,
		handle: &ChainHandle,
		tx: TxEnvelope,
		reward_ids: &[String],
		mint_history: Vec<MintHistory>,
	) -> Result<DispatchOutcome, ManagerError> {
		let hash = *tx.tx_hash();
		let record = BlockchainTransaction::new(&handle.chain.name, hash);
		let mut ledger_tx = self.repos.ledger.begin().await?;

		let staged = stage(ledger_tx.as_mut(), &record, reward_ids, mint_history).await;
		if let Err(e) = staged {
			rollback(ledger_tx, &record).await;
			return Err(e);
		}

		let result = handle
			.dispatcher
			.dispatch(DispatchRequest {
				chain: handle.chain.name.clone(),
				tx,
			})
			.await;
		if !result.success {
			rollback(ledger_tx, &record).await;
			return Err(ManagerError::Dispatch(format!(
				"{}: {}",
				result.error,
				result.message.unwrap_or_default()
			)));
		}

		// The transaction is on its way; a tracking failure is recovered by
		// the stale sweep, so it must not undo the ledger rows.
		if let Err(e) = handle.watcher.track_tx(hash).await {
			warn!(tx_hash = %format_hash(&hash), error = %e, "Failed to track transaction");
		}

		ledger_tx.commit().await.map_err(|e| {
			error!(
				chain = %handle.chain.name,
				tx_hash = %format_hash(&hash),
				transaction_id = %record.id,
				error = %e,
				"Commit failed after dispatch"
			);
			ManagerError::from(e)
		})?;

		info!(
			chain = %handle.chain.name,
			tx_hash = %format_hash(&hash),
			transaction_id = %record.id,
			rewards = reward_ids.len(),
			"Payout dispatched"
		);
		Ok(DispatchOutcome {
			transaction_id: record.id,
			tx_hash: hash,
		})
	}

	/// Polls receipts of in-progress transactions older than the stale
	/// threshold and reconciles those that have one. Returns how many were
	/// reconciled.
	pub async fn sweep_stale(&self) -> Result<usize, ManagerError> {
		let cutoff = current_timestamp().saturating_sub(self.stale_after.as_secs());
		let stale = self.repos.transactions.get_stale_in_progress(cutoff).await?;
		let mut reconciled = 0;

		for record in stale {
			let Some(handle) = self.registry.get(&record.chain).await else {
				continue;
			};
			let receipt = match handle.client.transaction_receipt(record.tx_hash).await {
				Ok(Some(receipt)) => receipt,
				Ok(None) => {
					debug!(tx_hash = %format_hash(&record.tx_hash), "Stale transaction has no receipt yet");
					continue;
				},
				Err(e) => {
					warn!(tx_hash = %format_hash(&record.tx_hash), error = %e, "Stale receipt lookup failed");
					continue;
				},
			};

			let update = TrackUpdate {
				chain: record.chain.clone(),
				hash: record.tx_hash,
				block_height: receipt.block_number,
				result: if receipt.success {
					TrackResult::Confirmed
				} else {
					TrackResult::Failed
				},
				payload: Vec::new(),
			};
			match handle.watcher.reconcile(update).await {
				Ok(()) => reconciled += 1,
				Err(e) => {
					error!(tx_hash = %format_hash(&record.tx_hash), error = %e, "Failed to reconcile stale transaction");
				},
			}
		}

		if reconciled > 0 {
			info!(reconciled, "Recovered stale transactions");
		}
		Ok(reconciled)
	}
}

async fn stage(
	ledger_tx: &mut dyn LedgerTransaction,
	record: &BlockchainTransaction,
	reward_ids: &[String],
	mint_history: Vec<MintHistory>,
) -> Result<(), ManagerError> {
	ledger_tx.insert_transaction(record).await?;
	if !reward_ids.is_empty() {
		ledger_tx
			.update_transaction_link_by_ids(reward_ids, &record.id)
			.await?;
	}
	for mut history in mint_history {
		history.transaction_id = record.id.clone();
		ledger_tx.create_mint_history(&history).await?;
	}
	Ok(())
}

async fn rollback(ledger_tx: Box<dyn LedgerTransaction>, record: &BlockchainTransaction) {
	if let Err(e) = ledger_tx.rollback().await {
		error!(transaction_id = %record.id, error = %e, "Rollback failed");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::tests::{chain, NoopWatcher};
	use alloy::network::{EthereumWallet, TransactionBuilder};
	use alloy::primitives::{Address, U256};
	use alloy::rpc::types::TransactionRequest;
	use async_trait::async_trait;
	use payout_delivery::{EvmDispatcher, MockChainClient};
	use payout_storage::implementations::ledger::MemoryLedger;
	use payout_storage::Ledger;
	use payout_types::{
		Community, Nft, PendingReward, ReceiptInfo, RewardStatus, SecretString, Token, TokenRef,
		TransactionStatus,
	};
	use payout_watcher::{WatcherError, WatcherInterface};
	use rust_decimal::Decimal;
	use std::sync::Mutex;

	const NONCE: &str = "community-nonce";

	fn token_address() -> Address {
		Address::repeat_byte(0x77)
	}

	fn recipient() -> Address {
		Address::repeat_byte(0xaa)
	}

	/// Records tracked hashes and reconciled updates.
	#[derive(Default)]
	struct RecordingWatcher {
		tracked: Mutex<Vec<B256>>,
		reconciled: Mutex<Vec<TrackUpdate>>,
	}

	#[async_trait]
	impl WatcherInterface for RecordingWatcher {
		async fn track_tx(&self, hash: B256) -> Result<(), WatcherError> {
			self.tracked.lock().unwrap().push(hash);
			Ok(())
		}

		async fn reconcile(&self, update: TrackUpdate) -> Result<(), WatcherError> {
			self.reconciled.lock().unwrap().push(update);
			Ok(())
		}
	}

	/// Hands out one prepared handle.
	struct PreparedFactory {
		handle: Mutex<Option<ChainHandle>>,
	}

	#[async_trait]
	impl ChainFactory for PreparedFactory {
		async fn create(&self, chain: &payout_types::Chain) -> Result<ChainHandle, ManagerError> {
			self.handle
				.lock()
				.unwrap()
				.take()
				.ok_or_else(|| ManagerError::Config(format!("no handle for {}", chain.name)))
		}
	}

	async fn signed_transfer() -> TxEnvelope {
		let signer = payout_account::derive(&SecretString::from("secret"), NONCE).unwrap();
		TransactionRequest::default()
			.with_from(signer.address())
			.with_to(token_address())
			.with_nonce(0)
			.with_chain_id(31337)
			.with_gas_limit(60_000)
			.with_gas_price(1_000_000_000)
			.build(&EthereumWallet::from(signer))
			.await
			.unwrap()
	}

	async fn seeded_ledger() -> Arc<MemoryLedger> {
		let ledger = Arc::new(MemoryLedger::new());
		let mut testchain = chain("testchain");
		testchain.tokens.push(Token {
			address: token_address(),
			symbol: "TT".into(),
			decimals: 18,
		});
		ledger.upsert_chain(testchain).await;
		ledger
			.insert_community(Community {
				id: "c1".into(),
				wallet_nonce: Some(NONCE.into()),
			})
			.await;
		ledger
			.insert_reward(PendingReward {
				id: "r1".into(),
				community_id: "c1".into(),
				recipient: recipient(),
				amount: Decimal::new(50, 1),
				token: Some(TokenRef {
					chain: "testchain".into(),
					address: token_address(),
				}),
				nft_id: None,
				transaction_id: None,
				status: RewardStatus::Pending,
			})
			.await;
		ledger
	}

	fn nft_reward(id: &str, nft_id: &str, to: Address, amount: Decimal) -> PendingReward {
		PendingReward {
			id: id.into(),
			community_id: "c1".into(),
			recipient: to,
			amount,
			token: None,
			nft_id: Some(nft_id.into()),
			transaction_id: None,
			status: RewardStatus::Pending,
		}
	}

	/// A ledger whose only pending rewards are the given NFT rewards.
	async fn nft_ledger(rewards: Vec<PendingReward>) -> Arc<MemoryLedger> {
		let ledger = Arc::new(MemoryLedger::new());
		ledger.upsert_chain(chain("testchain")).await;
		ledger
			.insert_community(Community {
				id: "c1".into(),
				wallet_nonce: Some(NONCE.into()),
			})
			.await;
		for (id, token_id) in [("n1", 1u64), ("n2", 2u64)] {
			ledger
				.insert_nft(Nft {
					id: id.into(),
					chain: "testchain".into(),
					token_id: U256::from(token_id),
					name: format!("Badge {}", token_id),
				})
				.await;
		}
		for reward in rewards {
			ledger.insert_reward(reward).await;
		}
		ledger
	}

	fn manager(
		ledger: &Arc<MemoryLedger>,
		client: MockChainClient,
		watcher: Arc<dyn WatcherInterface>,
	) -> PayoutManager {
		let client: Arc<dyn payout_delivery::ChainClient> = Arc::new(client);
		let handle = ChainHandle {
			chain: chain("testchain"),
			client: client.clone(),
			dispatcher: Arc::new(EvmDispatcher::new(client)),
			watcher,
		};
		PayoutManager::new(
			ledger.repositories(),
			Arc::new(PreparedFactory {
				handle: Mutex::new(Some(handle)),
			}),
			Duration::from_secs(30),
			Duration::from_secs(600),
		)
	}

	#[tokio::test]
	async fn test_cycle_dispatches_and_links_reward() {
		let ledger = seeded_ledger().await;
		let tx = signed_transfer().await;
		let hash = *tx.tx_hash();
		let expected_amount = U256::from(5u64) * U256::from(10u64).pow(U256::from(18u64));

		let mut client = MockChainClient::new();
		client
			.expect_signed_transfer_token_tx()
			.withf(move |nonce, token, to, amount| {
				nonce.to_string() == NONCE
					&& *token == token_address()
					&& *to == recipient()
					&& *amount == expected_amount
			})
			.times(1)
			.return_once(move |_, _, _, _| Ok(tx));
		client.expect_balance_at().returning(|_| Ok(U256::MAX));
		client
			.expect_send_raw_transaction()
			.times(1)
			.returning(move |_| Ok(hash));
		let watcher = Arc::new(RecordingWatcher::default());
		let manager = manager(&ledger, client, watcher.clone());

		manager.run_once().await;

		let transactions = ledger.transactions().await;
		assert_eq!(transactions.len(), 1);
		assert_eq!(transactions[0].status, TransactionStatus::InProgress);
		assert_eq!(transactions[0].tx_hash, hash);
		assert_eq!(
			ledger.reward("r1").await.unwrap().transaction_id,
			Some(transactions[0].id.clone())
		);
		assert_eq!(*watcher.tracked.lock().unwrap(), vec![hash]);

		// Linked rewards are no longer pending, so the next cycle is a no-op.
		manager.run_once().await;
		assert_eq!(ledger.transactions().await.len(), 1);
	}

	#[tokio::test]
	async fn test_unfunded_wallet_rolls_back() {
		let ledger = seeded_ledger().await;
		let tx = signed_transfer().await;

		let mut client = MockChainClient::new();
		client
			.expect_signed_transfer_token_tx()
			.return_once(move |_, _, _, _| Ok(tx));
		client.expect_balance_at().returning(|_| Ok(U256::ZERO));
		client.expect_send_raw_transaction().never();
		let watcher = Arc::new(RecordingWatcher::default());
		let manager = manager(&ledger, client, watcher.clone());

		manager.run_once().await;

		assert!(ledger.transactions().await.is_empty());
		assert_eq!(ledger.reward("r1").await.unwrap().transaction_id, None);
		assert!(watcher.tracked.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_link_conflict_aborts_before_dispatch() {
		let ledger = seeded_ledger().await;
		let tx = signed_transfer().await;

		let mut client = MockChainClient::new();
		client.expect_balance_at().never();
		client.expect_send_raw_transaction().never();
		let manager = manager(&ledger, client, Arc::new(NoopWatcher));
		manager.sync_chains().await.unwrap();

		// Someone else already paid r1.
		let mut other = ledger.begin().await.unwrap();
		let paid = BlockchainTransaction::new("testchain", B256::repeat_byte(9));
		other.insert_transaction(&paid).await.unwrap();
		other
			.update_transaction_link_by_ids(&["r1".to_string()], &paid.id)
			.await
			.unwrap();
		other.commit().await.unwrap();

		let handle = manager.chain("testchain").await.unwrap();
		let result = manager
			.execute(&handle, tx, &["r1".to_string()], Vec::new())
			.await;
		assert!(matches!(result, Err(ManagerError::Repository(_))));
		assert_eq!(ledger.transactions().await.len(), 1);
		assert_eq!(ledger.reward("r1").await.unwrap().transaction_id, Some(paid.id));
	}

	#[tokio::test]
	async fn test_open_link_blocks_second_dispatch() {
		let ledger = seeded_ledger().await;
		let tx = signed_transfer().await;

		let mut client = MockChainClient::new();
		client.expect_balance_at().never();
		client.expect_send_raw_transaction().never();
		let manager = manager(&ledger, client, Arc::new(NoopWatcher));
		manager.sync_chains().await.unwrap();

		// Another payout has staged r1 but not committed yet.
		let mut other = ledger.begin().await.unwrap();
		let in_flight = BlockchainTransaction::new("testchain", B256::repeat_byte(9));
		other.insert_transaction(&in_flight).await.unwrap();
		other
			.update_transaction_link_by_ids(&["r1".to_string()], &in_flight.id)
			.await
			.unwrap();

		let handle = manager.chain("testchain").await.unwrap();
		let result = manager
			.execute(&handle, tx, &["r1".to_string()], Vec::new())
			.await;
		assert!(matches!(result, Err(ManagerError::Repository(_))));

		other.commit().await.unwrap();
		assert_eq!(ledger.transactions().await.len(), 1);
		assert_eq!(
			ledger.reward("r1").await.unwrap().transaction_id,
			Some(in_flight.id)
		);
	}

	#[tokio::test]
	async fn test_nft_rewards_mint_in_one_transaction() {
		let other = Address::repeat_byte(0xbb);
		let ledger = nft_ledger(vec![
			nft_reward("r1", "n1", recipient(), Decimal::from(2)),
			nft_reward("r2", "n2", other, Decimal::from(1)),
		])
		.await;
		let tx = signed_transfer().await;
		let hash = *tx.tx_hash();

		let mut client = MockChainClient::new();
		client
			.expect_signed_mint_nft_tx()
			.withf(move |nonce, mints, data| {
				let first = NftMint {
					recipient: recipient(),
					token_id: U256::from(1),
					amount: U256::from(2),
				};
				let second = NftMint {
					recipient: other,
					token_id: U256::from(2),
					amount: U256::from(1),
				};
				nonce.to_string() == NONCE
					&& mints.len() == 2
					&& mints.contains(&first)
					&& mints.contains(&second)
					&& data.is_empty()
			})
			.times(1)
			.return_once(move |_, _, _| Ok(tx));
		client.expect_signed_transfer_token_tx().never();
		client.expect_balance_at().returning(|_| Ok(U256::MAX));
		client
			.expect_send_raw_transaction()
			.times(1)
			.returning(move |_| Ok(hash));
		let watcher = Arc::new(RecordingWatcher::default());
		let manager = manager(&ledger, client, watcher.clone());

		manager.run_once().await;

		let transactions = ledger.transactions().await;
		assert_eq!(transactions.len(), 1);
		assert_eq!(transactions[0].tx_hash, hash);
		let transaction_id = transactions[0].id.clone();
		for id in ["r1", "r2"] {
			assert_eq!(
				ledger.reward(id).await.unwrap().transaction_id,
				Some(transaction_id.clone())
			);
		}

		let mut history = ledger.mint_history().await;
		history.sort_by(|a, b| a.nft_id.cmp(&b.nft_id));
		assert_eq!(
			history,
			vec![
				MintHistory {
					nft_id: "n1".into(),
					transaction_id: transaction_id.clone(),
					recipient: recipient(),
					amount: U256::from(2),
				},
				MintHistory {
					nft_id: "n2".into(),
					transaction_id,
					recipient: other,
					amount: U256::from(1),
				},
			]
		);
		assert_eq!(*watcher.tracked.lock().unwrap(), vec![hash]);
	}

	#[tokio::test]
	async fn test_fractional_nft_amount_is_not_minted() {
		let ledger = nft_ledger(vec![nft_reward(
			"r1",
			"n1",
			recipient(),
			Decimal::new(15, 1),
		)])
		.await;

		let mut client = MockChainClient::new();
		client.expect_signed_mint_nft_tx().never();
		client.expect_balance_at().never();
		client.expect_send_raw_transaction().never();
		let watcher = Arc::new(RecordingWatcher::default());
		let manager = manager(&ledger, client, watcher.clone());

		manager.run_once().await;

		assert!(ledger.transactions().await.is_empty());
		assert!(ledger.mint_history().await.is_empty());
		assert_eq!(ledger.reward("r1").await.unwrap().transaction_id, None);
		assert!(watcher.tracked.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_stale_sweep_reconciles_with_receipt() {
		let ledger = seeded_ledger().await;
		let stale_hash = B256::repeat_byte(1);
		let fresh_hash = B256::repeat_byte(2);
		let mut stale = BlockchainTransaction::new("testchain", stale_hash);
		stale.created_at = 1;
		let fresh = BlockchainTransaction::new("testchain", fresh_hash);
		let mut ledger_tx = ledger.begin().await.unwrap();
		ledger_tx.insert_transaction(&stale).await.unwrap();
		ledger_tx.insert_transaction(&fresh).await.unwrap();
		ledger_tx.commit().await.unwrap();

		let mut client = MockChainClient::new();
		client
			.expect_transaction_receipt()
			.withf(move |h| *h == stale_hash)
			.times(1)
			.returning(|h| {
				Ok(Some(ReceiptInfo {
					tx_hash: h,
					block_number: 77,
					success: false,
					gas_used: 30_000,
					contract_address: None,
				}))
			});
		let watcher = Arc::new(RecordingWatcher::default());
		let manager = manager(&ledger, client, watcher.clone());
		manager.sync_chains().await.unwrap();

		assert_eq!(manager.sweep_stale().await.unwrap(), 1);
		let reconciled = watcher.reconciled.lock().unwrap();
		assert_eq!(reconciled.len(), 1);
		assert_eq!(reconciled[0].hash, stale_hash);
		assert_eq!(reconciled[0].block_height, 77);
		assert_eq!(reconciled[0].result, TrackResult::Failed);
	}

	#[tokio::test(start_paused = true)]
	async fn test_run_stops_on_shutdown() {
		let ledger = Arc::new(MemoryLedger::new());
		let manager = Arc::new(manager(&ledger, MockChainClient::new(), Arc::new(NoopWatcher)));
		let (stop, shutdown) = watch::channel(false);
		let task = tokio::spawn({
			let manager = manager.clone();
			async move { manager.run(shutdown).await }
		});

		tokio::time::sleep(Duration::from_secs(65)).await;
		stop.send(true).unwrap();
		task.await.unwrap();
	}
}
