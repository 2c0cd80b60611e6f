//! Chain and token definitions.
//!
//! A chain is loaded from the chain store (seeded from configuration) and is
//! immutable for the lifetime of the process. The manager reloads the full
//! list periodically to pick up chains added at runtime.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An ERC-20 token supported on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Token {
	pub address: Address,
	pub symbol: String,
	pub decimals: u8,
}

/// Reference from a reward to the fungible token it pays out in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TokenRef {
	pub chain: String,
	pub address: Address,
}

/// A configured EVM-compatible blockchain network.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Chain {
	/// Unique chain name, used as the registry key.
	pub name: String,
	/// Numeric EIP-155 chain id.
	pub id: u64,
	/// Nominal block time in milliseconds; the starting poll interval.
	#[serde(default = "default_block_time_ms")]
	pub block_time_ms: u64,
	/// Step by which the block poll interval is loosened or tightened.
	#[serde(default = "default_adjust_time_ms")]
	pub adjust_time_ms: u64,
	/// Number of blocks to stay behind the tip. Negative values behave as zero.
	#[serde(default)]
	pub threshold: i64,
	/// Whether to augment `rpc_urls` with endpoints discovered from a public
	/// chain metadata page.
	#[serde(default)]
	pub use_external_rpc: bool,
	/// Statically configured RPC endpoints.
	#[serde(default)]
	pub rpc_urls: Vec<String>,
	/// London fee market (EIP-1559) when true, legacy EIP-155 pricing otherwise.
	#[serde(default = "default_eip1559")]
	pub eip1559: bool,
	/// Reward NFT (ERC-1155) contract used for NFT payouts.
	#[serde(default)]
	pub nft_contract: Option<Address>,
	/// Supported ERC-20 tokens.
	#[serde(default)]
	pub tokens: Vec<Token>,
}

fn default_block_time_ms() -> u64 {
	2_000
}

fn default_adjust_time_ms() -> u64 {
	1_000
}

fn default_eip1559() -> bool {
	true
}

impl Chain {
	pub fn block_time(&self) -> Duration {
		Duration::from_millis(self.block_time_ms)
	}

	pub fn adjust_time(&self) -> Duration {
		Duration::from_millis(self.adjust_time_ms)
	}

	/// Lag behind the chain tip, clamped to zero.
	pub fn threshold_blocks(&self) -> u64 {
		self.threshold.max(0) as u64
	}

	/// Looks up a supported token by contract address.
	pub fn token(&self, address: &Address) -> Option<&Token> {
		self.tokens.iter().find(|t| &t.address == address)
	}
}
