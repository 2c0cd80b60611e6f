//! Repository interfaces for the reward ledger.
//!
//! Reads go straight through the repository traits. Writes that must be
//! atomic with a dispatch go through a `LedgerTransaction` obtained from
//! `Ledger::begin`, which is either committed or rolled back as one unit.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use payout_types::{
	BlockchainTransaction, Chain, Community, MintHistory, Nft, PendingReward, RewardStatus, Token,
	TransactionStatus,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
	#[error("{0} not found")]
	NotFound(String),
	#[error("Conflict: {0}")]
	Conflict(String),
	#[error("Backend error: {0}")]
	Backend(String),
}

#[async_trait]
pub trait RewardRepository: Send + Sync {
	/// Rewards with status `Pending` and no transaction link.
	async fn get_all_pending(&self) -> Result<Vec<PendingReward>, RepositoryError>;

	async fn get_by_id(&self, id: &str) -> Result<PendingReward, RepositoryError>;

	/// Sets the status of every reward linked to `transaction_id`, returning
	/// how many were updated.
	async fn update_status_by_transaction(
		&self,
		transaction_id: &str,
		status: RewardStatus,
	) -> Result<usize, RepositoryError>;
}

#[async_trait]
pub trait ChainRepository: Send + Sync {
	async fn get_all(&self) -> Result<Vec<Chain>, RepositoryError>;

	async fn get_by_name(&self, name: &str) -> Result<Chain, RepositoryError>;

	async fn get_token(&self, chain: &str, address: &Address) -> Result<Token, RepositoryError>;
}

#[async_trait]
pub trait CommunityRepository: Send + Sync {
	async fn get_by_id(&self, id: &str) -> Result<Community, RepositoryError>;

	async fn update_wallet_nonce(&self, id: &str, nonce: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait NftRepository: Send + Sync {
	async fn get_by_id(&self, id: &str) -> Result<Nft, RepositoryError>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
	async fn get_by_hash(
		&self,
		chain: &str,
		hash: &B256,
	) -> Result<BlockchainTransaction, RepositoryError>;

	async fn update_status(
		&self,
		id: &str,
		status: TransactionStatus,
		block_height: Option<u64>,
	) -> Result<(), RepositoryError>;

	/// In-progress transactions created strictly before `created_before`
	/// (unix seconds).
	async fn get_stale_in_progress(
		&self,
		created_before: u64,
	) -> Result<Vec<BlockchainTransaction>, RepositoryError>;
}

/// Entry point for atomic ledger writes.
#[async_trait]
pub trait Ledger: Send + Sync {
	async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, RepositoryError>;
}

/// A unit of work over the ledger.
///
/// Nothing written through a transaction is visible to readers until
/// `commit` succeeds. Dropping a transaction without committing discards it.
#[async_trait]
pub trait LedgerTransaction: Send {
	async fn insert_transaction(&mut self, tx: &BlockchainTransaction)
		-> Result<(), RepositoryError>;

	/// Links every reward in `reward_ids` to `transaction_id`.
	///
	/// Fails with `Conflict` if any reward is already linked, so a reward can
	/// never be paid by two transactions.
	async fn update_transaction_link_by_ids(
		&mut self,
		reward_ids: &[String],
		transaction_id: &str,
	) -> Result<(), RepositoryError>;

	async fn create_mint_history(&mut self, history: &MintHistory) -> Result<(), RepositoryError>;

	async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

	async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}

/// Every repository the manager and watchers need, as shared handles.
#[derive(Clone)]
pub struct Repositories {
	pub rewards: Arc<dyn RewardRepository>,
	pub chains: Arc<dyn ChainRepository>,
	pub communities: Arc<dyn CommunityRepository>,
	pub nfts: Arc<dyn NftRepository>,
	pub transactions: Arc<dyn TransactionRepository>,
	pub ledger: Arc<dyn Ledger>,
}
