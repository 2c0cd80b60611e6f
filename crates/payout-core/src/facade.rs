//! Direct chain operations served by the HTTP API.

use crate::batching::NonceResolver;
use crate::manager::{DispatchOutcome, PayoutManager};
use crate::ManagerError;
use alloy::primitives::{Address, Bytes, B256, U256};
use payout_account::WalletDeriver;
use payout_delivery::{NftMint, TokenInfo};
use payout_types::MintHistory;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// A dispatched contract creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployedContract {
	pub transaction_id: String,
	pub tx_hash: B256,
	/// Address the contract lands at once the transaction is mined.
	pub contract_address: Address,
}

pub struct PayoutFacade {
	manager: Arc<PayoutManager>,
	wallets: WalletDeriver,
	deployer_nonce: String,
	nft_bytecode: Option<Bytes>,
}

impl PayoutFacade {
	pub fn new(
		manager: Arc<PayoutManager>,
		wallets: WalletDeriver,
		deployer_nonce: String,
		nft_bytecode: Option<Bytes>,
	) -> Self {
		Self {
			manager,
			wallets,
			deployer_nonce,
			nft_bytecode,
		}
	}

	pub async fn erc20_token_info(
		&self,
		chain: &str,
		token: Address,
	) -> Result<TokenInfo, ManagerError> {
		let handle = self.manager.chain(chain).await?;
		Ok(handle.client.erc20_token_info(token).await?)
	}

	pub async fn erc20_balance_of(
		&self,
		chain: &str,
		token: Address,
		account: Address,
	) -> Result<U256, ManagerError> {
		let handle = self.manager.chain(chain).await?;
		Ok(handle.client.erc20_balance_of(token, account).await?)
	}

	/// ERC-1155 balance. `contract` defaults to the chain's reward NFT
	/// contract.
	pub async fn erc1155_balance_of(
		&self,
		chain: &str,
		contract: Option<Address>,
		account: Address,
		token_id: U256,
	) -> Result<U256, ManagerError> {
		let handle = self.manager.chain(chain).await?;
		let contract = contract.or(handle.chain.nft_contract).ok_or_else(|| {
			ManagerError::Config(format!("Chain {} has no reward NFT contract", chain))
		})?;
		Ok(handle
			.client
			.erc1155_balance_of(contract, account, token_id)
			.await?)
	}

	/// Mints `amount` of an NFT from the community's wallet and records the
	/// mint. `recipient` defaults to the community wallet itself.
	#[instrument(skip_all, fields(community_id = %community_id, chain = %chain, nft_id = %nft_id))]
	pub async fn mint_nft(
		&self,
		community_id: &str,
		chain: &str,
		nft_id: &str,
		recipient: Option<Address>,
		amount: U256,
		metadata_ref: &str,
	) -> Result<DispatchOutcome, ManagerError> {
		if amount.is_zero() {
			return Err(ManagerError::InvalidReward("mint amount must be positive".into()));
		}
		let handle = self.manager.chain(chain).await?;
		let repos = self.manager.repositories();
		let nft = repos.nfts.get_by_id(nft_id).await?;
		if nft.chain != chain {
			return Err(ManagerError::InvalidReward(format!(
				"NFT {} belongs to chain {}, not {}",
				nft_id, nft.chain, chain
			)));
		}

		let nonce = NonceResolver::new(repos.communities.clone())
			.resolve(community_id)
			.await?;
		let recipient = match recipient {
			Some(recipient) => recipient,
			None => self
				.wallets
				.address(&nonce)
				.map_err(|e| ManagerError::Config(e.to_string()))?,
		};

		let tx = handle
			.client
			.signed_mint_nft_tx(
				&nonce,
				vec![NftMint {
					recipient,
					token_id: nft.token_id,
					amount,
				}],
				Bytes::copy_from_slice(metadata_ref.as_bytes()),
			)
			.await?;
		let history = MintHistory {
			nft_id: nft_id.to_string(),
			transaction_id: String::new(),
			recipient,
			amount,
		};
		self.manager
			.execute(&handle, tx, &[], vec![history])
			.await
	}

	/// Deploys the reward NFT contract from the platform deployer wallet.
	#[instrument(skip_all, fields(chain = %chain))]
	pub async fn deploy_nft_contract(&self, chain: &str) -> Result<DeployedContract, ManagerError> {
		let bytecode = self
			.nft_bytecode
			.clone()
			.ok_or_else(|| ManagerError::Config("NFT contract bytecode is not configured".into()))?;
		let handle = self.manager.chain(chain).await?;

		let (tx, contract_address) = handle
			.client
			.signed_deploy_nft_tx(&self.deployer_nonce, bytecode)
			.await?;
		let outcome = self.manager.execute(&handle, tx, &[], Vec::new()).await?;

		info!(chain, contract = %contract_address, "NFT contract deployment dispatched");
		Ok(DeployedContract {
			transaction_id: outcome.transaction_id,
			tx_hash: outcome.tx_hash,
			contract_address,
		})
	}
}
