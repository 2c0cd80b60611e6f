//! Grouping of pending rewards into payout batches.
//!
//! Fungible rewards with the same funding wallet, recipient, chain and token
//! are combined into one transfer. NFT rewards from the same funding wallet
//! on the same chain are combined into one multi-recipient mint.

use crate::ManagerError;
use alloy::primitives::{Address, U256};
use payout_account::generate_nonce;
use payout_storage::CommunityRepository;
use payout_types::{Nft, PendingReward, RewardAsset};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FungibleBatch {
	pub wallet_nonce: String,
	pub recipient: Address,
	pub chain: String,
	pub token: Address,
	/// Sum of the batched reward amounts, in whole token units.
	pub amount: Decimal,
	pub reward_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftItem {
	pub recipient: Address,
	pub nft_id: String,
	pub token_id: U256,
	pub amount: Decimal,
	pub reward_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftBatch {
	pub wallet_nonce: String,
	pub chain: String,
	pub items: Vec<NftItem>,
}

impl NftBatch {
	pub fn reward_ids(&self) -> Vec<String> {
		self.items.iter().map(|i| i.reward_id.clone()).collect()
	}
}

#[derive(Debug, Default)]
pub struct Batches {
	pub fungible: Vec<FungibleBatch>,
	pub nft: Vec<NftBatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct FungibleKey {
	wallet_nonce: String,
	recipient: Address,
	chain: String,
	token: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct NftKey {
	wallet_nonce: String,
	chain: String,
}

/// Groups `rewards` into batches.
///
/// `nonces` maps community ids to wallet nonces and `nfts` maps NFT ids to
/// their records. Rewards that are not pending, reference both or neither
/// asset, or whose community or NFT cannot be resolved are logged and left
/// out.
pub fn group_rewards(
	rewards: &[PendingReward],
	nonces: &HashMap<String, String>,
	nfts: &HashMap<String, Nft>,
) -> Batches {
	let mut fungible: BTreeMap<FungibleKey, FungibleBatch> = BTreeMap::new();
	let mut nft: BTreeMap<NftKey, NftBatch> = BTreeMap::new();

	for reward in rewards.iter().filter(|r| r.is_pending()) {
		let asset = match reward.asset() {
			Ok(asset) => asset,
			Err(e) => {
				error!(reward_id = %reward.id, error = %e, "Skipping invalid reward");
				continue;
			},
		};
		let Some(nonce) = nonces.get(&reward.community_id) else {
			error!(reward_id = %reward.id, community_id = %reward.community_id, "No wallet nonce for community");
			continue;
		};

		match asset {
			RewardAsset::Token(token) => {
				let key = FungibleKey {
					wallet_nonce: nonce.clone(),
					recipient: reward.recipient,
					chain: token.chain.clone(),
					token: token.address,
				};
				let batch = fungible.entry(key).or_insert_with(|| FungibleBatch {
					wallet_nonce: nonce.clone(),
					recipient: reward.recipient,
					chain: token.chain.clone(),
					token: token.address,
					amount: Decimal::ZERO,
					reward_ids: Vec::new(),
				});
				batch.amount += reward.amount;
				batch.reward_ids.push(reward.id.clone());
			},
			RewardAsset::Nft(nft_id) => {
				let Some(record) = nfts.get(nft_id) else {
					error!(reward_id = %reward.id, nft_id, "Unknown NFT");
					continue;
				};
				let key = NftKey {
					wallet_nonce: nonce.clone(),
					chain: record.chain.clone(),
				};
				nft.entry(key)
					.or_insert_with(|| NftBatch {
						wallet_nonce: nonce.clone(),
						chain: record.chain.clone(),
						items: Vec::new(),
					})
					.items
					.push(NftItem {
						recipient: reward.recipient,
						nft_id: nft_id.to_string(),
						token_id: record.token_id,
						amount: reward.amount,
						reward_id: reward.id.clone(),
					});
			},
		}
	}

	Batches {
		fungible: fungible.into_values().collect(),
		nft: nft.into_values().collect(),
	}
}

/// Resolves community wallet nonces, each at most once per pass.
///
/// Communities without a nonce get a fresh one, which is persisted before
/// it is used so the derived wallet stays stable across passes.
pub struct NonceResolver {
	communities: Arc<dyn CommunityRepository>,
	cache: HashMap<String, String>,
}

impl NonceResolver {
	pub fn new(communities: Arc<dyn CommunityRepository>) -> Self {
		Self {
			communities,
			cache: HashMap::new(),
		}
	}

	pub async fn resolve(&mut self, community_id: &str) -> Result<String, ManagerError> {
		if let Some(nonce) = self.cache.get(community_id) {
			return Ok(nonce.clone());
		}

		let community = self.communities.get_by_id(community_id).await?;
		let nonce = match community.wallet_nonce.filter(|n| !n.is_empty()) {
			Some(nonce) => nonce,
			None => {
				let nonce = generate_nonce();
				self.communities
					.update_wallet_nonce(community_id, &nonce)
					.await?;
				info!(community_id, "Generated wallet nonce for community");
				nonce
			},
		};
		self.cache.insert(community_id.to_string(), nonce.clone());
		Ok(nonce)
	}

	/// Nonces resolved so far, keyed by community id.
	pub fn resolved(&self) -> &HashMap<String, String> {
		&self.cache
	}
}
