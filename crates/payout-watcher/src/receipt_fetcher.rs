//! Bounded-retry receipt lookups for tracked transactions.

use alloy::primitives::B256;
use payout_delivery::ChainClient;
use payout_types::{format_hash, ObservedTx, ReceiptInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, instrument, warn};

/// Tracked transactions found in one block.
#[derive(Debug, Clone)]
pub struct ReceiptRequest {
	pub block_number: u64,
	pub block_hash: B256,
	pub transactions: Vec<ObservedTx>,
}

/// A request together with one receipt per transaction, in the same order.
#[derive(Debug, Clone)]
pub struct ReceiptResponse {
	pub block_number: u64,
	pub block_hash: B256,
	pub transactions: Vec<ObservedTx>,
	pub receipts: Vec<ReceiptInfo>,
}

pub struct ReceiptFetcher {
	client: Arc<dyn ChainClient>,
	max_attempts: u32,
	backoff: Duration,
	timeout: Duration,
}

impl ReceiptFetcher {
	pub fn new(
		client: Arc<dyn ChainClient>,
		max_attempts: u32,
		backoff: Duration,
		timeout: Duration,
	) -> Self {
		Self {
			client,
			max_attempts: max_attempts.max(1),
			backoff,
			timeout,
		}
	}

	/// Looks up one receipt, retrying up to the attempt limit. A missing
	/// receipt counts as a failed attempt.
	pub async fn fetch_receipt(&self, hash: B256) -> Option<ReceiptInfo> {
		for attempt in 1..=self.max_attempts {
			match tokio::time::timeout(self.timeout, self.client.transaction_receipt(hash)).await {
				Ok(Ok(Some(receipt))) => return Some(receipt),
				Ok(Ok(None)) => {
					debug!(tx_hash = %format_hash(&hash), attempt, "Receipt not yet available");
				},
				Ok(Err(e)) => {
					warn!(tx_hash = %format_hash(&hash), attempt, error = %e, "Receipt lookup failed");
				},
				Err(_) => {
					warn!(tx_hash = %format_hash(&hash), attempt, "Receipt lookup timed out");
				},
			}
			if attempt < self.max_attempts {
				tokio::time::sleep(self.backoff).await;
			}
		}
		None
	}

	/// Resolves the transactions of the request in order. A transaction
	/// whose receipt cannot be obtained is logged and left out; the rest of
	/// the batch is still returned. `None` when nothing resolved.
	pub async fn fetch(&self, request: ReceiptRequest) -> Option<ReceiptResponse> {
		let mut transactions = Vec::with_capacity(request.transactions.len());
		let mut receipts = Vec::with_capacity(request.transactions.len());
		for tx in request.transactions {
			match self.fetch_receipt(tx.hash).await {
				Some(receipt) => {
					transactions.push(tx);
					receipts.push(receipt);
				},
				None => {
					warn!(
						block = request.block_number,
						tx_hash = %format_hash(&tx.hash),
						attempts = self.max_attempts,
						"Giving up on receipt"
					);
				},
			}
		}
		if transactions.is_empty() {
			return None;
		}
		Some(ReceiptResponse {
			block_number: request.block_number,
			block_hash: request.block_hash,
			transactions,
			receipts,
		})
	}

	#[instrument(skip_all)]
	pub async fn run(
		self,
		mut requests: mpsc::Receiver<ReceiptRequest>,
		responses: mpsc::Sender<ReceiptResponse>,
		mut shutdown: watch::Receiver<bool>,
	) {
		loop {
			let request = tokio::select! {
				request = requests.recv() => match request {
					Some(request) => request,
					None => return,
				},
				_ = shutdown.changed() => return,
			};

			let response = tokio::select! {
				response = self.fetch(request) => response,
				_ = shutdown.changed() => return,
			};

			if let Some(response) = response {
				if responses.send(response).await.is_err() {
					debug!("Receipt response receiver closed");
					return;
				}
			}
		}
	}
}
