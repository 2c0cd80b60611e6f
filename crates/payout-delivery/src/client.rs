//! EVM implementation of `ChainClient`.
//!
//! Every RPC call goes through a healthy endpoint from the chain's pool and
//! is bounded by the request timeout. Signing picks the fee model from the
//! chain definition: London (EIP-1559) or legacy EIP-155.

use crate::contracts::{IRewardNft, IERC20};
use crate::{ChainClient, DeliveryError, NftMint, RpcEndpoint, RpcPool, TokenInfo};
use alloy::consensus::TxEnvelope;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use payout_account::WalletDeriver;
use payout_types::{BlockInfo, Chain, ReceiptInfo};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Headroom added on top of the node's gas estimate, in percent.
const GAS_LIMIT_MARGIN_PERCENT: u64 = 20;

pub struct EvmClient {
	chain: Chain,
	pool: Arc<RpcPool>,
	wallets: WalletDeriver,
	request_timeout: Duration,
}

impl EvmClient {
	pub fn new(
		chain: Chain,
		pool: Arc<RpcPool>,
		wallets: WalletDeriver,
		request_timeout: Duration,
	) -> Self {
		Self {
			chain,
			pool,
			wallets,
			request_timeout,
		}
	}

	pub fn chain(&self) -> &Chain {
		&self.chain
	}

	pub fn pool(&self) -> &Arc<RpcPool> {
		&self.pool
	}

	/// Runs `op` against a healthy endpoint under the request timeout.
	async fn with_rpc<T, F, Fut>(&self, name: &str, op: F) -> Result<T, DeliveryError>
	where
		F: FnOnce(Arc<dyn RpcEndpoint>) -> Fut,
		Fut: Future<Output = Result<T, DeliveryError>>,
	{
		let rpc = self.pool.healthy_client().await?;
		tokio::time::timeout(self.request_timeout, op(rpc))
			.await
			.map_err(|_| DeliveryError::Timeout(name.to_string()))?
	}

	async fn read_call(&self, to: Address, data: Vec<u8>) -> Result<Bytes, DeliveryError> {
		let request = TransactionRequest::default()
			.with_to(to)
			.with_input(data);
		self.with_rpc("eth_call", |rpc| async move { rpc.call(request).await })
			.await
	}

	fn nft_contract(&self) -> Result<Address, DeliveryError> {
		self.chain.nft_contract.ok_or_else(|| {
			DeliveryError::Configuration(format!(
				"chain {} has no reward NFT contract",
				self.chain.name
			))
		})
	}

	/// Fills nonce, gas and fees for the wallet of `wallet_nonce`, then signs.
	async fn sign(
		&self,
		wallet_nonce: &str,
		request: TransactionRequest,
	) -> Result<TxEnvelope, DeliveryError> {
		let signer = self.wallets.signer(wallet_nonce)?;
		let from = signer.address();
		let mut request = request.with_from(from).with_chain_id(self.chain.id);

		let eip1559 = self.chain.eip1559;
		let estimate = request.clone();
		let (nonce, gas, gas_price, priority_fee) = self
			.with_rpc("prepare transaction", |rpc| async move {
				let nonce = rpc.transaction_count(from).await?;
				let gas = rpc.estimate_gas(estimate).await?;
				let gas_price = rpc.gas_price().await?;
				let priority_fee = if eip1559 {
					rpc.max_priority_fee().await?
				} else {
					0
				};
				Ok::<_, DeliveryError>((nonce, gas, gas_price, priority_fee))
			})
			.await?;

		request.set_nonce(nonce);
		request.set_gas_limit(gas.saturating_mul(100 + GAS_LIMIT_MARGIN_PERCENT) / 100);
		if eip1559 {
			request.set_max_priority_fee_per_gas(priority_fee);
			request.set_max_fee_per_gas(gas_price.saturating_add(priority_fee));
		} else {
			request.set_gas_price(gas_price);
		}

		let wallet = EthereumWallet::from(signer);
		let envelope = request
			.build(&wallet)
			.await
			.map_err(|e| DeliveryError::Signing(e.to_string()))?;

		debug!(
			chain = %self.chain.name,
			from = %from,
			nonce,
			tx_hash = %envelope.tx_hash(),
			"Signed transaction"
		);
		Ok(envelope)
	}
}

#[async_trait]
impl ChainClient for EvmClient {
	async fn block_number(&self) -> Result<u64, DeliveryError> {
		self.with_rpc("block number", |rpc| async move { rpc.block_number().await })
			.await
	}

	async fn block_at(&self, height: u64) -> Result<BlockInfo, DeliveryError> {
		let safe_tip = self
			.block_number()
			.await?
			.saturating_sub(self.chain.threshold_blocks());
		if height > safe_tip {
			return Err(DeliveryError::HeightExceeded {
				requested: height,
				safe_tip,
			});
		}

		self.with_rpc("block by number", |rpc| async move {
			rpc.block_by_number(height).await
		})
		.await?
		.ok_or(DeliveryError::BlockNotFound(height))
	}

	async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, DeliveryError> {
		self.with_rpc("receipt", |rpc| async move {
			rpc.transaction_receipt(hash).await
		})
		.await
	}

	async fn balance_at(&self, address: Address) -> Result<U256, DeliveryError> {
		self.with_rpc("balance", |rpc| async move { rpc.balance(address).await })
			.await
	}

	async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, DeliveryError> {
		self.with_rpc("send raw transaction", |rpc| async move {
			rpc.send_raw_transaction(raw).await
		})
		.await
	}

	#[instrument(skip_all, fields(chain = %self.chain.name, token = %token, recipient = %recipient))]
	async fn signed_transfer_token_tx(
		&self,
		wallet_nonce: &str,
		token: Address,
		recipient: Address,
		amount: U256,
	) -> Result<TxEnvelope, DeliveryError> {
		let data = IERC20::transferCall {
			to: recipient,
			amount,
		}
		.abi_encode();
		let request = TransactionRequest::default()
			.with_to(token)
			.with_input(data);
		self.sign(wallet_nonce, request).await
	}

	#[instrument(skip_all, fields(chain = %self.chain.name, mints = mints.len()))]
	async fn signed_mint_nft_tx(
		&self,
		wallet_nonce: &str,
		mints: Vec<NftMint>,
		data: Bytes,
	) -> Result<TxEnvelope, DeliveryError> {
		let contract = self.nft_contract()?;
		let calldata = match mints.as_slice() {
			[] => {
				return Err(DeliveryError::Contract("mint with no recipients".into()));
			},
			[single] => IRewardNft::mintCall {
				to: single.recipient,
				id: single.token_id,
				amount: single.amount,
				data,
			}
			.abi_encode(),
			_ => IRewardNft::batchMintCall {
				to: mints.iter().map(|m| m.recipient).collect(),
				ids: mints.iter().map(|m| m.token_id).collect(),
				amounts: mints.iter().map(|m| m.amount).collect(),
				data,
			}
			.abi_encode(),
		};

		let request = TransactionRequest::default()
			.with_to(contract)
			.with_input(calldata);
		self.sign(wallet_nonce, request).await
	}

	#[instrument(skip_all, fields(chain = %self.chain.name))]
	async fn signed_deploy_nft_tx(
		&self,
		wallet_nonce: &str,
		bytecode: Bytes,
	) -> Result<(TxEnvelope, Address), DeliveryError> {
		if bytecode.is_empty() {
			return Err(DeliveryError::Configuration(
				"NFT contract bytecode is empty".into(),
			));
		}
		let request = TransactionRequest::default().with_deploy_code(bytecode);
		let envelope = self.sign(wallet_nonce, request).await?;

		let deployer = self.wallets.address(wallet_nonce)?;
		let nonce = alloy::consensus::Transaction::nonce(&envelope);
		Ok((envelope, deployer.create(nonce)))
	}

	async fn erc20_token_info(&self, token: Address) -> Result<TokenInfo, DeliveryError> {
		let decode = |what: &str, e: alloy::sol_types::Error| {
			DeliveryError::Contract(format!("Invalid {} response from {}: {}", what, token, e))
		};

		let name = self.read_call(token, IERC20::nameCall {}.abi_encode()).await?;
		let symbol = self.read_call(token, IERC20::symbolCall {}.abi_encode()).await?;
		let decimals = self
			.read_call(token, IERC20::decimalsCall {}.abi_encode())
			.await?;

		Ok(TokenInfo {
			address: token,
			name: IERC20::nameCall::abi_decode_returns(&name).map_err(|e| decode("name", e))?,
			symbol: IERC20::symbolCall::abi_decode_returns(&symbol)
				.map_err(|e| decode("symbol", e))?,
			decimals: IERC20::decimalsCall::abi_decode_returns(&decimals)
				.map_err(|e| decode("decimals", e))?,
		})
	}

	async fn erc20_balance_of(
		&self,
		token: Address,
		account: Address,
	) -> Result<U256, DeliveryError> {
		let result = self
			.read_call(token, IERC20::balanceOfCall { account }.abi_encode())
			.await?;
		U256::abi_decode(&result)
			.map_err(|e| DeliveryError::Contract(format!("Invalid balanceOf response: {}", e)))
	}

	async fn erc1155_balance_of(
		&self,
		contract: Address,
		account: Address,
		token_id: U256,
	) -> Result<U256, DeliveryError> {
		let result = self
			.read_call(
				contract,
				IRewardNft::balanceOfCall {
					account,
					id: token_id,
				}
				.abi_encode(),
			)
			.await?;
		U256::abi_decode(&result)
			.map_err(|e| DeliveryError::Contract(format!("Invalid balanceOf response: {}", e)))
	}
}
