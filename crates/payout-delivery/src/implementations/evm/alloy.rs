//! Alloy HTTP implementation of `RpcEndpoint`.

use crate::{DeliveryError, RpcConnector, RpcEndpoint};
use alloy::consensus::Transaction;
use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionResponse;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use payout_types::{BlockInfo, ObservedTx, ReceiptInfo};
use std::sync::Arc;

/// A single HTTP JSON-RPC endpoint.
pub struct AlloyEndpoint {
	url: String,
	provider: RootProvider,
}

impl AlloyEndpoint {
	pub fn connect(url: &str) -> Result<Self, DeliveryError> {
		let parsed = url
			.parse()
			.map_err(|e| DeliveryError::Configuration(format!("Invalid RPC URL {}: {}", url, e)))?;
		Ok(Self {
			url: url.to_string(),
			provider: RootProvider::new_http(parsed),
		})
	}

	fn network_error(&self, op: &str, e: impl std::fmt::Display) -> DeliveryError {
		DeliveryError::Network(format!("{} via {} failed: {}", op, self.url, e))
	}
}

#[async_trait]
impl RpcEndpoint for AlloyEndpoint {
	fn url(&self) -> String {
		self.url.clone()
	}

	async fn latest_block_height(&self) -> Result<Option<u64>, DeliveryError> {
		let block = self
			.provider
			.get_block_by_number(BlockNumberOrTag::Latest)
			.await
			.map_err(|e| self.network_error("get latest block", e))?;
		Ok(block.map(|b| b.header.number))
	}

	async fn block_number(&self) -> Result<u64, DeliveryError> {
		self.provider
			.get_block_number()
			.await
			.map_err(|e| self.network_error("get block number", e))
	}

	async fn block_by_number(&self, number: u64) -> Result<Option<BlockInfo>, DeliveryError> {
		let Some(block) = self
			.provider
			.get_block_by_number(BlockNumberOrTag::Number(number))
			.full()
			.await
			.map_err(|e| self.network_error("get block", e))?
		else {
			return Ok(None);
		};

		let transactions = block
			.transactions
			.txns()
			.map(|tx| ObservedTx {
				hash: TransactionResponse::tx_hash(tx),
				from: TransactionResponse::from(tx),
				to: Transaction::to(tx),
				value: Transaction::value(tx),
				input: Transaction::input(tx).clone(),
			})
			.collect();

		Ok(Some(BlockInfo {
			number: block.header.number,
			hash: block.header.hash,
			transactions,
		}))
	}

	async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, DeliveryError> {
		let receipt = self
			.provider
			.get_transaction_receipt(hash)
			.await
			.map_err(|e| self.network_error("get receipt", e))?;

		Ok(receipt.map(|r| ReceiptInfo {
			tx_hash: r.transaction_hash,
			block_number: r.block_number.unwrap_or_default(),
			success: r.status(),
			gas_used: r.gas_used,
			contract_address: r.contract_address,
		}))
	}

	async fn balance(&self, address: Address) -> Result<U256, DeliveryError> {
		self.provider
			.get_balance(address)
			.await
			.map_err(|e| self.network_error("get balance", e))
	}

	async fn transaction_count(&self, address: Address) -> Result<u64, DeliveryError> {
		self.provider
			.get_transaction_count(address)
			.pending()
			.await
			.map_err(|e| self.network_error("get nonce", e))
	}

	async fn gas_price(&self) -> Result<u128, DeliveryError> {
		self.provider
			.get_gas_price()
			.await
			.map_err(|e| self.network_error("get gas price", e))
	}

	async fn max_priority_fee(&self) -> Result<u128, DeliveryError> {
		self.provider
			.get_max_priority_fee_per_gas()
			.await
			.map_err(|e| self.network_error("get priority fee", e))
	}

	async fn estimate_gas(&self, request: TransactionRequest) -> Result<u64, DeliveryError> {
		self.provider
			.estimate_gas(request)
			.await
			.map_err(|e| self.network_error("estimate gas", e))
	}

	async fn call(&self, request: TransactionRequest) -> Result<Bytes, DeliveryError> {
		self.provider
			.call(request)
			.await
			.map_err(|e| self.network_error("call", e))
	}

	async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, DeliveryError> {
		let pending = self
			.provider
			.send_raw_transaction(&raw)
			.await
			.map_err(|e| self.network_error("send raw transaction", e))?;
		Ok(*pending.tx_hash())
	}
}

/// Connects `AlloyEndpoint`s over HTTP.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlloyConnector;

impl RpcConnector for AlloyConnector {
	fn connect(&self, url: &str) -> Result<Arc<dyn RpcEndpoint>, DeliveryError> {
		Ok(Arc::new(AlloyEndpoint::connect(url)?))
	}
}
