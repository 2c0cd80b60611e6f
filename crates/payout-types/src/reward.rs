//! Reward ledger types.
//!
//! A pending reward is a unit of value owed to a user. It is funded by the
//! wallet of its source community and references exactly one asset: either
//! a fungible token or an NFT.

use crate::chain::TokenRef;
use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Settlement status of a reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum RewardStatus {
	Pending,
	Received,
	Failed,
}

/// A reward owed to a destination address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PendingReward {
	pub id: String,
	/// Community whose derived wallet funds the payout.
	pub community_id: String,
	pub recipient: Address,
	pub amount: Decimal,
	pub token: Option<TokenRef>,
	pub nft_id: Option<String>,
	/// Blockchain transaction carrying this reward, once batched.
	pub transaction_id: Option<String>,
	pub status: RewardStatus,
}

/// The asset a reward pays out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardAsset<'a> {
	Token(&'a TokenRef),
	Nft(&'a str),
}

/// A reward record that references both or neither of token and NFT.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidReward {
	#[error("reward {0} references both a token and an NFT")]
	BothAssets(String),
	#[error("reward {0} references neither a token nor an NFT")]
	NoAsset(String),
}

impl PendingReward {
	/// Resolves the asset, rejecting records with both or neither reference.
	pub fn asset(&self) -> Result<RewardAsset<'_>, InvalidReward> {
		match (&self.token, &self.nft_id) {
			(Some(token), None) => Ok(RewardAsset::Token(token)),
			(None, Some(nft)) => Ok(RewardAsset::Nft(nft)),
			(Some(_), Some(_)) => Err(InvalidReward::BothAssets(self.id.clone())),
			(None, None) => Err(InvalidReward::NoAsset(self.id.clone())),
		}
	}

	/// True while the reward still waits to be batched.
	pub fn is_pending(&self) -> bool {
		self.status == RewardStatus::Pending && self.transaction_id.is_none()
	}
}

/// A community funding rewards from a deterministically derived wallet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Community {
	pub id: String,
	/// Wallet derivation nonce. Communities created before nonce support have
	/// none and get one generated on first use.
	pub wallet_nonce: Option<String>,
}

/// NFT metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Nft {
	pub id: String,
	pub chain: String,
	/// ERC-1155 token id on the chain's reward NFT contract.
	pub token_id: U256,
	pub name: String,
}

/// A record of an NFT mint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MintHistory {
	pub nft_id: String,
	pub transaction_id: String,
	pub recipient: Address,
	pub amount: U256,
}
