//! In-memory ledger implementing every repository interface.
//!
//! Transactions stage their writes locally and apply them under a single
//! write lock on commit, so readers never see a half-applied batch. Linking
//! rewards reserves them at staging time; a second transaction staging a link
//! for a reserved reward fails immediately, as a row lock would.

use crate::repositories::{
	ChainRepository, CommunityRepository, Ledger, LedgerTransaction, NftRepository, Repositories,
	RepositoryError, RewardRepository, TransactionRepository,
};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use payout_types::{
	BlockchainTransaction, Chain, Community, MintHistory, Nft, PendingReward, RewardStatus, Token,
	TransactionStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerState {
	chains: Vec<Chain>,
	rewards: HashMap<String, PendingReward>,
	communities: HashMap<String, Community>,
	nfts: HashMap<String, Nft>,
	transactions: HashMap<String, BlockchainTransaction>,
	mint_history: Vec<MintHistory>,
	/// Reward id to the transaction id of the open ledger transaction that
	/// staged a link for it.
	reserved: HashMap<String, String>,
}

impl LedgerState {
	/// Fails if any reward is missing, already linked, or reserved by a
	/// transaction other than `owner`.
	fn check_unlinked(&self, reward_ids: &[String], owner: &str) -> Result<(), RepositoryError> {
		for id in reward_ids {
			let reward = self
				.rewards
				.get(id)
				.ok_or_else(|| RepositoryError::NotFound(format!("reward {}", id)))?;
			if let Some(existing) = &reward.transaction_id {
				return Err(RepositoryError::Conflict(format!(
					"reward {} already linked to transaction {}",
					id, existing
				)));
			}
			if let Some(holder) = self.reserved.get(id).filter(|holder| *holder != owner) {
				return Err(RepositoryError::Conflict(format!(
					"reward {} is being linked to transaction {}",
					id, holder
				)));
			}
		}
		Ok(())
	}

	/// Drops every reservation in `reserved`, leaving it empty.
	fn release(&mut self, reserved: &mut Vec<(String, String)>) {
		for (reward_id, owner) in reserved.drain(..) {
			if self.reserved.get(&reward_id).is_some_and(|holder| *holder == owner) {
				self.reserved.remove(&reward_id);
			}
		}
	}
}

enum StagedWrite {
	InsertTransaction(BlockchainTransaction),
	Link {
		reward_ids: Vec<String>,
		transaction_id: String,
	},
	MintHistory(MintHistory),
}

/// Ledger held entirely in memory.
#[derive(Default)]
pub struct MemoryLedger {
	state: Arc<RwLock<LedgerState>>,
}

impl MemoryLedger {
	pub fn new() -> Self {
		Self::default()
	}

	/// Wraps one shared ledger as every repository handle.
	pub fn repositories(self: &Arc<Self>) -> Repositories {
		Repositories {
			rewards: self.clone(),
			chains: self.clone(),
			communities: self.clone(),
			nfts: self.clone(),
			transactions: self.clone(),
			ledger: self.clone(),
		}
	}

	/// Adds a chain, replacing any existing chain with the same name.
	pub async fn upsert_chain(&self, chain: Chain) {
		let mut state = self.state.write().await;
		state.chains.retain(|c| c.name != chain.name);
		state.chains.push(chain);
	}

	pub async fn insert_reward(&self, reward: PendingReward) {
		self.state
			.write()
			.await
			.rewards
			.insert(reward.id.clone(), reward);
	}

	pub async fn insert_community(&self, community: Community) {
		self.state
			.write()
			.await
			.communities
			.insert(community.id.clone(), community);
	}

	pub async fn insert_nft(&self, nft: Nft) {
		self.state.write().await.nfts.insert(nft.id.clone(), nft);
	}

	/// Snapshot of every blockchain transaction row.
	pub async fn transactions(&self) -> Vec<BlockchainTransaction> {
		self.state
			.read()
			.await
			.transactions
			.values()
			.cloned()
			.collect()
	}

	pub async fn reward(&self, id: &str) -> Option<PendingReward> {
		self.state.read().await.rewards.get(id).cloned()
	}

	pub async fn mint_history(&self) -> Vec<MintHistory> {
		self.state.read().await.mint_history.clone()
	}
}

#[async_trait]
impl RewardRepository for MemoryLedger {
	async fn get_all_pending(&self) -> Result<Vec<PendingReward>, RepositoryError> {
		let state = self.state.read().await;
		let mut pending: Vec<_> = state
			.rewards
			.values()
			.filter(|r| r.is_pending())
			.cloned()
			.collect();
		pending.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(pending)
	}

	async fn get_by_id(&self, id: &str) -> Result<PendingReward, RepositoryError> {
		self.reward(id)
			.await
			.ok_or_else(|| RepositoryError::NotFound(format!("reward {}", id)))
	}

	async fn update_status_by_transaction(
		&self,
		transaction_id: &str,
		status: RewardStatus,
	) -> Result<usize, RepositoryError> {
		let mut state = self.state.write().await;
		let mut updated = 0;
		for reward in state.rewards.values_mut() {
			if reward.transaction_id.as_deref() == Some(transaction_id) {
				reward.status = status;
				updated += 1;
			}
		}
		Ok(updated)
	}
}

#[async_trait]
impl ChainRepository for MemoryLedger {
	async fn get_all(&self) -> Result<Vec<Chain>, RepositoryError> {
		Ok(self.state.read().await.chains.clone())
	}

	async fn get_by_name(&self, name: &str) -> Result<Chain, RepositoryError> {
		self.state
			.read()
			.await
			.chains
			.iter()
			.find(|c| c.name == name)
			.cloned()
			.ok_or_else(|| RepositoryError::NotFound(format!("chain {}", name)))
	}

	async fn get_token(&self, chain: &str, address: &Address) -> Result<Token, RepositoryError> {
		let chain = ChainRepository::get_by_name(self, chain).await?;
		chain
			.token(address)
			.cloned()
			.ok_or_else(|| RepositoryError::NotFound(format!("token {} on {}", address, chain.name)))
	}
}

#[async_trait]
impl CommunityRepository for MemoryLedger {
	async fn get_by_id(&self, id: &str) -> Result<Community, RepositoryError> {
		self.state
			.read()
			.await
			.communities
			.get(id)
			.cloned()
			.ok_or_else(|| RepositoryError::NotFound(format!("community {}", id)))
	}

	async fn update_wallet_nonce(&self, id: &str, nonce: &str) -> Result<(), RepositoryError> {
		let mut state = self.state.write().await;
		let community = state
			.communities
			.get_mut(id)
			.ok_or_else(|| RepositoryError::NotFound(format!("community {}", id)))?;
		community.wallet_nonce = Some(nonce.to_string());
		Ok(())
	}
}

#[async_trait]
impl NftRepository for MemoryLedger {
	async fn get_by_id(&self, id: &str) -> Result<Nft, RepositoryError> {
		self.state
			.read()
			.await
			.nfts
			.get(id)
			.cloned()
			.ok_or_else(|| RepositoryError::NotFound(format!("nft {}", id)))
	}
}

#[async_trait]
impl TransactionRepository for MemoryLedger {
	async fn get_by_hash(
		&self,
		chain: &str,
		hash: &B256,
	) -> Result<BlockchainTransaction, RepositoryError> {
		self.state
			.read()
			.await
			.transactions
			.values()
			.find(|t| t.chain == chain && t.tx_hash == *hash)
			.cloned()
			.ok_or_else(|| RepositoryError::NotFound(format!("transaction {:#x} on {}", hash, chain)))
	}

	async fn update_status(
		&self,
		id: &str,
		status: TransactionStatus,
		block_height: Option<u64>,
	) -> Result<(), RepositoryError> {
		let mut state = self.state.write().await;
		let tx = state
			.transactions
			.get_mut(id)
			.ok_or_else(|| RepositoryError::NotFound(format!("transaction {}", id)))?;
		tx.status = status;
		if block_height.is_some() {
			tx.block_height = block_height;
		}
		Ok(())
	}

	async fn get_stale_in_progress(
		&self,
		created_before: u64,
	) -> Result<Vec<BlockchainTransaction>, RepositoryError> {
		Ok(self
			.state
			.read()
			.await
			.transactions
			.values()
			.filter(|t| t.status == TransactionStatus::InProgress && t.created_at < created_before)
			.cloned()
			.collect())
	}
}

#[async_trait]
impl Ledger for MemoryLedger {
	async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, RepositoryError> {
		Ok(Box::new(MemoryLedgerTransaction {
			state: self.state.clone(),
			staged: Vec::new(),
			reserved: Vec::new(),
		}))
	}
}

/// Writes staged against a `MemoryLedger` until commit.
pub struct MemoryLedgerTransaction {
	state: Arc<RwLock<LedgerState>>,
	staged: Vec<StagedWrite>,
	/// Rewards reserved by this transaction, with the owning transaction id.
	reserved: Vec<(String, String)>,
}

impl MemoryLedgerTransaction {
	fn staged_transaction_exists(&self, id: &str) -> bool {
		self.staged
			.iter()
			.any(|w| matches!(w, StagedWrite::InsertTransaction(t) if t.id == id))
	}
}

impl Drop for MemoryLedgerTransaction {
	/// Releases reservations of a transaction that was neither committed nor
	/// rolled back.
	fn drop(&mut self) {
		if self.reserved.is_empty() {
			return;
		}
		let mut reserved = std::mem::take(&mut self.reserved);
		let state = self.state.clone();
		match state.try_write() {
			Ok(mut guard) => guard.release(&mut reserved),
			Err(_) => {
				if let Ok(runtime) = tokio::runtime::Handle::try_current() {
					let state = state.clone();
					runtime.spawn(async move {
						state.write().await.release(&mut reserved);
					});
				}
			},
		};
	}
}

#[async_trait]
impl LedgerTransaction for MemoryLedgerTransaction {
	async fn insert_transaction(
		&mut self,
		tx: &BlockchainTransaction,
	) -> Result<(), RepositoryError> {
		if self.staged_transaction_exists(&tx.id)
			|| self.state.read().await.transactions.contains_key(&tx.id)
		{
			return Err(RepositoryError::Conflict(format!(
				"transaction {} already exists",
				tx.id
			)));
		}
		self.staged.push(StagedWrite::InsertTransaction(tx.clone()));
		Ok(())
	}

	async fn update_transaction_link_by_ids(
		&mut self,
		reward_ids: &[String],
		transaction_id: &str,
	) -> Result<(), RepositoryError> {
		if !self.staged_transaction_exists(transaction_id)
			&& !self
				.state
				.read()
				.await
				.transactions
				.contains_key(transaction_id)
		{
			return Err(RepositoryError::NotFound(format!(
				"transaction {}",
				transaction_id
			)));
		}
		let mut state = self.state.write().await;
		state.check_unlinked(reward_ids, transaction_id)?;
		for id in reward_ids {
			state.reserved.insert(id.clone(), transaction_id.to_string());
			self.reserved.push((id.clone(), transaction_id.to_string()));
		}
		drop(state);
		self.staged.push(StagedWrite::Link {
			reward_ids: reward_ids.to_vec(),
			transaction_id: transaction_id.to_string(),
		});
		Ok(())
	}

	async fn create_mint_history(&mut self, history: &MintHistory) -> Result<(), RepositoryError> {
		self.staged.push(StagedWrite::MintHistory(history.clone()));
		Ok(())
	}

	async fn commit(mut self: Box<Self>) -> Result<(), RepositoryError> {
		let state_lock = self.state.clone();
		let mut state = state_lock.write().await;

		for write in &self.staged {
			if let StagedWrite::Link {
				reward_ids,
				transaction_id,
			} = write
			{
				if let Err(e) = state.check_unlinked(reward_ids, transaction_id) {
					state.release(&mut self.reserved);
					return Err(e);
				}
			}
		}

		state.release(&mut self.reserved);
		for write in std::mem::take(&mut self.staged) {
			match write {
				StagedWrite::InsertTransaction(tx) => {
					state.transactions.insert(tx.id.clone(), tx);
				},
				StagedWrite::Link {
					reward_ids,
					transaction_id,
				} => {
					for id in reward_ids {
						if let Some(reward) = state.rewards.get_mut(&id) {
							reward.transaction_id = Some(transaction_id.clone());
						}
					}
				},
				StagedWrite::MintHistory(history) => state.mint_history.push(history),
			}
		}
		Ok(())
	}

	async fn rollback(mut self: Box<Self>) -> Result<(), RepositoryError> {
		let state_lock = self.state.clone();
		state_lock.write().await.release(&mut self.reserved);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::{address, U256};
	use payout_types::TokenRef;
	use rust_decimal::Decimal;

	fn reward(id: &str) -> PendingReward {
		PendingReward {
			id: id.to_string(),
			community_id: "c1".to_string(),
			recipient: address!("00000000000000000000000000000000000000aa"),
			amount: Decimal::new(5, 0),
			token: Some(TokenRef {
				chain: "testchain".to_string(),
				address: Address::ZERO,
			}),
			nft_id: None,
			transaction_id: None,
			status: RewardStatus::Pending,
		}
	}

	#[tokio::test]
	async fn test_commit_applies_insert_and_link() {
		let ledger = MemoryLedger::new();
		ledger.insert_reward(reward("r1")).await;
		ledger.insert_reward(reward("r2")).await;

		let row = BlockchainTransaction::new("testchain", B256::repeat_byte(1));
		let mut tx = ledger.begin().await.unwrap();
		tx.insert_transaction(&row).await.unwrap();
		tx.update_transaction_link_by_ids(&["r1".to_string()], &row.id)
			.await
			.unwrap();

		// Staged writes are invisible before commit.
		assert!(ledger.transactions().await.is_empty());
		tx.commit().await.unwrap();

		assert_eq!(ledger.transactions().await.len(), 1);
		assert_eq!(
			ledger.reward("r1").await.unwrap().transaction_id,
			Some(row.id.clone())
		);
		let pending = ledger.get_all_pending().await.unwrap();
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].id, "r2");
	}

	#[tokio::test]
	async fn test_rollback_discards_everything() {
		let ledger = MemoryLedger::new();
		ledger.insert_reward(reward("r1")).await;

		let row = BlockchainTransaction::new("testchain", B256::repeat_byte(2));
		let mut tx = ledger.begin().await.unwrap();
		tx.insert_transaction(&row).await.unwrap();
		tx.update_transaction_link_by_ids(&["r1".to_string()], &row.id)
			.await
			.unwrap();
		tx.rollback().await.unwrap();

		assert!(ledger.transactions().await.is_empty());
		assert!(ledger.reward("r1").await.unwrap().transaction_id.is_none());
	}

	#[tokio::test]
	async fn test_concurrent_link_conflicts_at_staging() {
		let ledger = MemoryLedger::new();
		ledger.insert_reward(reward("r1")).await;
		let ids = vec!["r1".to_string()];

		let first = BlockchainTransaction::new("testchain", B256::repeat_byte(3));
		let second = BlockchainTransaction::new("testchain", B256::repeat_byte(4));

		let mut a = ledger.begin().await.unwrap();
		a.insert_transaction(&first).await.unwrap();
		a.update_transaction_link_by_ids(&ids, &first.id).await.unwrap();

		// The second staging fails before anything could be dispatched.
		let mut b = ledger.begin().await.unwrap();
		b.insert_transaction(&second).await.unwrap();
		assert!(matches!(
			b.update_transaction_link_by_ids(&ids, &second.id).await,
			Err(RepositoryError::Conflict(_))
		));
		b.rollback().await.unwrap();

		a.commit().await.unwrap();
		assert_eq!(ledger.transactions().await.len(), 1);
		assert_eq!(ledger.reward("r1").await.unwrap().transaction_id, Some(first.id));
	}

	#[tokio::test]
	async fn test_rollback_and_drop_release_reservation() {
		let ledger = MemoryLedger::new();
		ledger.insert_reward(reward("r1")).await;
		let ids = vec!["r1".to_string()];

		let rolled_back = BlockchainTransaction::new("testchain", B256::repeat_byte(6));
		let mut a = ledger.begin().await.unwrap();
		a.insert_transaction(&rolled_back).await.unwrap();
		a.update_transaction_link_by_ids(&ids, &rolled_back.id).await.unwrap();
		a.rollback().await.unwrap();

		let dropped = BlockchainTransaction::new("testchain", B256::repeat_byte(7));
		let mut b = ledger.begin().await.unwrap();
		b.insert_transaction(&dropped).await.unwrap();
		b.update_transaction_link_by_ids(&ids, &dropped.id).await.unwrap();
		drop(b);

		let committed = BlockchainTransaction::new("testchain", B256::repeat_byte(8));
		let mut c = ledger.begin().await.unwrap();
		c.insert_transaction(&committed).await.unwrap();
		c.update_transaction_link_by_ids(&ids, &committed.id).await.unwrap();
		c.commit().await.unwrap();

		assert_eq!(
			ledger.reward("r1").await.unwrap().transaction_id,
			Some(committed.id)
		);
	}

	#[tokio::test]
	async fn test_status_updates_and_stale_query() {
		let ledger = MemoryLedger::new();
		ledger.insert_reward(reward("r1")).await;

		let mut row = BlockchainTransaction::new("testchain", B256::repeat_byte(5));
		row.created_at = 100;
		let mut tx = ledger.begin().await.unwrap();
		tx.insert_transaction(&row).await.unwrap();
		tx.update_transaction_link_by_ids(&["r1".to_string()], &row.id)
			.await
			.unwrap();
		tx.create_mint_history(&MintHistory {
			nft_id: "n1".to_string(),
			transaction_id: row.id.clone(),
			recipient: Address::ZERO,
			amount: U256::from(1),
		})
		.await
		.unwrap();
		tx.commit().await.unwrap();

		assert_eq!(ledger.get_stale_in_progress(101).await.unwrap().len(), 1);
		assert!(ledger.get_stale_in_progress(100).await.unwrap().is_empty());

		let found = ledger
			.get_by_hash("testchain", &B256::repeat_byte(5))
			.await
			.unwrap();
		ledger
			.update_status(&found.id, TransactionStatus::Success, Some(42))
			.await
			.unwrap();
		let updated = ledger
			.update_status_by_transaction(&found.id, RewardStatus::Received)
			.await
			.unwrap();

		assert_eq!(updated, 1);
		assert_eq!(ledger.reward("r1").await.unwrap().status, RewardStatus::Received);
		assert_eq!(ledger.transactions().await[0].block_height, Some(42));
		assert!(ledger.get_stale_in_progress(u64::MAX).await.unwrap().is_empty());
		assert_eq!(ledger.mint_history().await.len(), 1);
	}
}
