//! Blockchain transaction records and on-chain observations.
//!
//! `BlockchainTransaction` is the persisted record of a submitted transaction.
//! The remaining types are transient values produced by the block and receipt
//! fetchers and consumed by the watcher.

use crate::utils::current_timestamp;
use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum TransactionStatus {
	InProgress,
	Success,
	Failure,
}

/// Record of one submitted on-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockchainTransaction {
	pub id: String,
	pub chain: String,
	pub tx_hash: B256,
	pub status: TransactionStatus,
	pub block_height: Option<u64>,
	/// Unix seconds at which the record was created.
	pub created_at: u64,
}

impl BlockchainTransaction {
	/// Creates an in-progress record with a fresh id.
	pub fn new(chain: impl Into<String>, tx_hash: B256) -> Self {
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			chain: chain.into(),
			tx_hash,
			status: TransactionStatus::InProgress,
			block_height: None,
			created_at: current_timestamp(),
		}
	}
}

/// A transaction as seen in a scanned block.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ObservedTx {
	pub hash: B256,
	pub from: Address,
	pub to: Option<Address>,
	pub value: U256,
	pub input: Bytes,
}

/// A block with its transactions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockInfo {
	pub number: u64,
	pub hash: B256,
	pub transactions: Vec<ObservedTx>,
}

/// The parts of a transaction receipt the dispatcher cares about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReceiptInfo {
	pub tx_hash: B256,
	pub block_number: u64,
	/// Receipt status field: false for reverted transactions.
	pub success: bool,
	pub gas_used: u64,
	pub contract_address: Option<Address>,
}

/// Outcome carried by a track update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum TrackResult {
	Confirmed,
	Failed,
}

/// Observed outcome of a tracked transaction, produced by the watcher
/// pipeline and applied by its reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackUpdate {
	pub chain: String,
	pub hash: B256,
	pub block_height: u64,
	pub result: TrackResult,
	/// JSON-serialized `ObservedTx`.
	pub payload: Vec<u8>,
}
