//! Transaction delivery module for the payout dispatcher.
//!
//! This crate owns everything that talks to a chain: the raw RPC endpoint
//! abstraction, the per-chain pool of healthy endpoints, the chain client
//! that builds and signs payout transactions, and the dispatcher that
//! validates funding and submits them.

use alloy::consensus::TxEnvelope;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use payout_account::AccountError;
use payout_types::{BlockInfo, DispatchResult, ReceiptInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod client;
pub mod contracts;
pub mod discovery;
pub mod dispatcher;
pub mod pool;

/// Re-export implementations
pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

pub use client::EvmClient;
pub use discovery::{ChainlistDiscovery, RpcDiscovery};
pub use dispatcher::EvmDispatcher;
pub use implementations::evm::alloy::{AlloyConnector, AlloyEndpoint};
pub use pool::{PoolSettings, RpcPool};

/// Errors that can occur while talking to a chain.
#[derive(Debug, Error)]
pub enum DeliveryError {
	#[error("Network error: {0}")]
	Network(String),
	#[error("No healthy RPC for chain {0}")]
	NoHealthyRpc(String),
	#[error("Block {0} not found")]
	BlockNotFound(u64),
	#[error("Block {requested} is beyond the safe tip {safe_tip}")]
	HeightExceeded { requested: u64, safe_tip: u64 },
	#[error("RPC call {0} timed out")]
	Timeout(String),
	#[error("Signing failed: {0}")]
	Signing(String),
	#[error("Contract call failed: {0}")]
	Contract(String),
	#[error("Invalid configuration: {0}")]
	Configuration(String),
	#[error("Account error: {0}")]
	Account(#[from] AccountError),
}

/// One RPC URL, reduced to the calls the dispatcher needs.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RpcEndpoint: Send + Sync {
	fn url(&self) -> String;

	/// Height of the latest block, or `None` if the node returned no block.
	async fn latest_block_height(&self) -> Result<Option<u64>, DeliveryError>;

	async fn block_number(&self) -> Result<u64, DeliveryError>;

	async fn block_by_number(&self, number: u64) -> Result<Option<BlockInfo>, DeliveryError>;

	async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, DeliveryError>;

	async fn balance(&self, address: Address) -> Result<U256, DeliveryError>;

	/// Pending transaction count, used as the next nonce.
	async fn transaction_count(&self, address: Address) -> Result<u64, DeliveryError>;

	async fn gas_price(&self) -> Result<u128, DeliveryError>;

	async fn max_priority_fee(&self) -> Result<u128, DeliveryError>;

	async fn estimate_gas(&self, request: TransactionRequest) -> Result<u64, DeliveryError>;

	async fn call(&self, request: TransactionRequest) -> Result<Bytes, DeliveryError>;

	async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, DeliveryError>;
}

/// Opens an `RpcEndpoint` for a URL.
pub trait RpcConnector: Send + Sync {
	fn connect(&self, url: &str) -> Result<Arc<dyn RpcEndpoint>, DeliveryError>;
}

/// One recipient of an NFT mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftMint {
	pub recipient: Address,
	pub token_id: U256,
	pub amount: U256,
}

/// ERC-20 metadata as reported by the token contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
	pub address: Address,
	pub name: String,
	pub symbol: String,
	pub decimals: u8,
}

/// Chain operations used by the manager, the watcher and the façade.
///
/// Signing methods take the community's wallet nonce and derive the key
/// internally; keys never cross this boundary.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
	async fn block_number(&self) -> Result<u64, DeliveryError>;

	/// Fails with `HeightExceeded` past the tip minus the chain threshold
	/// and with `BlockNotFound` when no node has the block yet.
	async fn block_at(&self, height: u64) -> Result<BlockInfo, DeliveryError>;

	async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, DeliveryError>;

	async fn balance_at(&self, address: Address) -> Result<U256, DeliveryError>;

	async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, DeliveryError>;

	async fn signed_transfer_token_tx(
		&self,
		wallet_nonce: &str,
		token: Address,
		recipient: Address,
		amount: U256,
	) -> Result<TxEnvelope, DeliveryError>;

	/// Signs one mint call on the chain's reward NFT contract covering every
	/// entry in `mints`.
	async fn signed_mint_nft_tx(
		&self,
		wallet_nonce: &str,
		mints: Vec<NftMint>,
		data: Bytes,
	) -> Result<TxEnvelope, DeliveryError>;

	/// Signs a contract creation, returning it with the address the contract
	/// will be deployed at.
	async fn signed_deploy_nft_tx(
		&self,
		wallet_nonce: &str,
		bytecode: Bytes,
	) -> Result<(TxEnvelope, Address), DeliveryError>;

	async fn erc20_token_info(&self, token: Address) -> Result<TokenInfo, DeliveryError>;

	async fn erc20_balance_of(&self, token: Address, account: Address)
		-> Result<U256, DeliveryError>;

	async fn erc1155_balance_of(
		&self,
		contract: Address,
		account: Address,
		token_id: U256,
	) -> Result<U256, DeliveryError>;
}

/// A signed transaction bound for one chain.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
	pub chain: String,
	pub tx: TxEnvelope,
}

/// Submits signed transactions.
///
/// Dispatch never returns an error: every outcome, including failures, is
/// described by the returned `DispatchResult`.
#[async_trait]
pub trait DispatcherInterface: Send + Sync {
	async fn dispatch(&self, request: DispatchRequest) -> DispatchResult;
}
