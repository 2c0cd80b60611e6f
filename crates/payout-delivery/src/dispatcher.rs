//! Funding-checked submission of signed transactions.

use crate::{ChainClient, DispatchRequest, DispatcherInterface};
use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::U256;
use async_trait::async_trait;
use payout_types::{DispatchErrorKind, DispatchResult};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Dispatcher for EVM chains.
///
/// Before submitting, the sender is recovered from the signature and its
/// balance is checked against the worst-case cost of the transaction, so an
/// underfunded transaction is never broadcast.
pub struct EvmDispatcher {
	client: Arc<dyn ChainClient>,
}

impl EvmDispatcher {
	pub fn new(client: Arc<dyn ChainClient>) -> Self {
		Self { client }
	}
}

/// Gas price times gas limit plus value. For London transactions the gas
/// price is the max fee per gas.
pub fn required_funds(tx: &TxEnvelope) -> U256 {
	U256::from(tx.max_fee_per_gas())
		.saturating_mul(U256::from(tx.gas_limit()))
		.saturating_add(tx.value())
}

/// Maps node error text onto a dispatch classification. `None` means the
/// error actually indicates the transaction is already in the pool.
fn classify_submission_error(message: &str) -> Option<DispatchErrorKind> {
	let message = message.to_lowercase();
	if message.contains("already known") {
		None
	} else if message.contains("nonce too low") || message.contains("nonce too high") {
		Some(DispatchErrorKind::NonceMismatch)
	} else {
		Some(DispatchErrorKind::SubmissionFailure)
	}
}

#[async_trait]
impl DispatcherInterface for EvmDispatcher {
	#[instrument(skip_all, fields(chain = %request.chain, tx_hash = %request.tx.tx_hash()))]
	async fn dispatch(&self, request: DispatchRequest) -> DispatchResult {
		let DispatchRequest { chain, tx } = request;
		let hash = *tx.tx_hash();

		let sender = match tx.recover_signer() {
			Ok(sender) => sender,
			Err(e) => {
				warn!(error = %e, "Failed to recover transaction sender");
				return DispatchResult::failure(
					chain,
					hash,
					DispatchErrorKind::SerializationFailure,
					e.to_string(),
				);
			},
		};

		let balance = match self.client.balance_at(sender).await {
			Ok(balance) => balance,
			Err(e) => {
				warn!(sender = %sender, error = %e, "Failed to query sender balance");
				return DispatchResult::failure(
					chain,
					hash,
					DispatchErrorKind::Generic,
					e.to_string(),
				);
			},
		};

		let required = required_funds(&tx);
		if required > balance {
			warn!(
				sender = %sender,
				%balance,
				%required,
				"Insufficient balance, not submitting"
			);
			return DispatchResult::failure(
				chain,
				hash,
				DispatchErrorKind::InsufficientBalance,
				format!("balance {} is below required {}", balance, required),
			);
		}

		let raw = tx.encoded_2718();
		match self.client.send_raw_transaction(raw.into()).await {
			Ok(_) => {
				info!(sender = %sender, "Transaction submitted");
				DispatchResult::success(chain, hash)
			},
			Err(e) => {
				let message = e.to_string();
				match classify_submission_error(&message) {
					None => {
						info!("Transaction already known to the node");
						DispatchResult::success(chain, hash)
					},
					Some(kind) => {
						warn!(error = %message, kind = %kind, "Transaction submission failed");
						DispatchResult::failure(chain, hash, kind, message)
					},
				}
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{DeliveryError, MockChainClient};
	use alloy::network::{EthereumWallet, TransactionBuilder};
	use alloy::primitives::{address, Address};
	use alloy::rpc::types::TransactionRequest;
	use payout_types::SecretString;

	const GAS_PRICE: u128 = 1_000_000_000;
	const GAS_LIMIT: u64 = 21_000;

	async fn signed_tx(value: u64) -> (TxEnvelope, Address) {
		let signer = payout_account::derive(&SecretString::from("secret"), "nonce").unwrap();
		let sender = signer.address();
		let tx = TransactionRequest::default()
			.with_from(sender)
			.with_to(address!("00000000000000000000000000000000000000aa"))
			.with_value(U256::from(value))
			.with_nonce(0)
			.with_chain_id(31337)
			.with_gas_limit(GAS_LIMIT)
			.with_gas_price(GAS_PRICE)
			.build(&EthereumWallet::from(signer))
			.await
			.unwrap();
		(tx, sender)
	}

	fn request(tx: TxEnvelope) -> DispatchRequest {
		DispatchRequest {
			chain: "testchain".into(),
			tx,
		}
	}

	#[tokio::test]
	async fn test_insufficient_balance_never_submits() {
		let (tx, sender) = signed_tx(1).await;
		let hash = *tx.tx_hash();

		let mut client = MockChainClient::new();
		client
			.expect_balance_at()
			.withf(move |addr| *addr == sender)
			.returning(|_| Ok(U256::from(GAS_PRICE) * U256::from(GAS_LIMIT)));
		client.expect_send_raw_transaction().never();

		let result = EvmDispatcher::new(Arc::new(client))
			.dispatch(request(tx))
			.await;

		assert!(!result.success);
		assert_eq!(result.error, DispatchErrorKind::InsufficientBalance);
		assert_eq!(result.tx_hash, hash);
		assert_eq!(result.chain, "testchain");
	}

	#[tokio::test]
	async fn test_exact_balance_submits() {
		let (tx, _) = signed_tx(1).await;
		let required = required_funds(&tx);

		let mut client = MockChainClient::new();
		client.expect_balance_at().returning(move |_| Ok(required));
		client
			.expect_send_raw_transaction()
			.times(1)
			.returning(|_| Ok(Default::default()));

		let result = EvmDispatcher::new(Arc::new(client))
			.dispatch(request(tx))
			.await;
		assert!(result.success);
		assert_eq!(result.error, DispatchErrorKind::None);
	}

	#[tokio::test]
	async fn test_already_known_is_success() {
		let (tx, _) = signed_tx(0).await;

		let mut client = MockChainClient::new();
		client.expect_balance_at().returning(|_| Ok(U256::MAX));
		client.expect_send_raw_transaction().times(1).returning(|_| {
			Err(DeliveryError::Network(
				"send raw transaction failed: already known".into(),
			))
		});

		let result = EvmDispatcher::new(Arc::new(client))
			.dispatch(request(tx))
			.await;
		assert!(result.success);
	}

	#[tokio::test]
	async fn test_submission_errors_are_classified() {
		for (message, expected) in [
			("nonce too low", DispatchErrorKind::NonceMismatch),
			("Nonce Too High", DispatchErrorKind::NonceMismatch),
			("replacement transaction underpriced", DispatchErrorKind::SubmissionFailure),
		] {
			let (tx, _) = signed_tx(0).await;
			let mut client = MockChainClient::new();
			client.expect_balance_at().returning(|_| Ok(U256::MAX));
			client
				.expect_send_raw_transaction()
				.returning(move |_| Err(DeliveryError::Network(message.into())));

			let result = EvmDispatcher::new(Arc::new(client))
				.dispatch(request(tx))
				.await;
			assert!(!result.success);
			assert_eq!(result.error, expected, "{}", message);
		}
	}

	#[tokio::test]
	async fn test_balance_query_failure_is_generic() {
		let (tx, _) = signed_tx(0).await;
		let mut client = MockChainClient::new();
		client
			.expect_balance_at()
			.returning(|_| Err(DeliveryError::NoHealthyRpc("testchain".into())));
		client.expect_send_raw_transaction().never();

		let result = EvmDispatcher::new(Arc::new(client))
			.dispatch(request(tx))
			.await;
		assert_eq!(result.error, DispatchErrorKind::Generic);
	}

	#[test]
	fn test_required_funds_uses_max_fee_for_london() {
		use alloy::consensus::{Signed, TxEip1559};
		use alloy::primitives::Signature;

		let tx = TxEip1559 {
			chain_id: 1,
			gas_limit: 100,
			max_fee_per_gas: 7,
			max_priority_fee_per_gas: 1,
			value: U256::from(5),
			..Default::default()
		};
		let envelope: TxEnvelope =
			Signed::new_unchecked(tx, Signature::new(U256::from(1), U256::from(1), false), Default::default())
				.into();
		assert_eq!(required_funds(&envelope), U256::from(705));
	}
}
