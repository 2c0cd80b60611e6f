//! Adaptive block poller.
//!
//! The poll interval starts at the chain's block time. Every block found
//! tightens it by a quarter of the adjustment step, down to the minimum wait;
//! every miss loosens it by a full step, up to the maximum wait. The cursor
//! trails the tip by the chain threshold so shallow reorgs settle before a
//! block is scanned.

use crate::WatcherSettings;
use payout_delivery::{ChainClient, DeliveryError};
use payout_types::{BlockInfo, Chain};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

/// Some nodes fail full-block decoding for blocks whose body they have not
/// indexed yet. Those blocks are skipped rather than retried forever.
const EMPTY_TX_LIST_ERROR: &str = "empty transaction list";

pub struct BlockFetcher {
	chain: Chain,
	client: Arc<dyn ChainClient>,
	cursor: u64,
	interval: Duration,
	adjust: Duration,
	min_wait: Duration,
	max_wait: Duration,
}

impl BlockFetcher {
	pub fn new(chain: Chain, client: Arc<dyn ChainClient>, settings: &WatcherSettings) -> Self {
		let max_wait = settings.max_wait.max(settings.min_wait);
		Self {
			interval: chain.block_time().clamp(settings.min_wait, max_wait),
			adjust: chain.adjust_time(),
			min_wait: settings.min_wait,
			max_wait,
			cursor: 0,
			chain,
			client,
		}
	}

	pub fn cursor(&self) -> u64 {
		self.cursor
	}

	pub fn interval(&self) -> Duration {
		self.interval
	}

	/// Positions the cursor at the tip minus the chain threshold.
	pub async fn start(&mut self) -> Result<(), DeliveryError> {
		let tip = self.client.block_number().await?;
		self.cursor = tip.saturating_sub(self.chain.threshold_blocks());
		info!(chain = %self.chain.name, tip, cursor = self.cursor, "Block fetcher positioned");
		Ok(())
	}

	/// One scan step: fetches the block at the cursor and adapts the interval.
	pub async fn poll_once(&mut self) -> Option<BlockInfo> {
		match self.client.block_at(self.cursor).await {
			Ok(block) => Some(self.found(block)),
			Err(DeliveryError::BlockNotFound(_)) => {
				tokio::time::sleep(self.interval / 4).await;
				match self.client.block_at(self.cursor).await {
					Ok(block) => Some(self.found(block)),
					Err(e) => {
						debug!(chain = %self.chain.name, height = self.cursor, error = %e, "Block still unavailable");
						self.loosen();
						None
					},
				}
			},
			Err(DeliveryError::HeightExceeded { .. }) => {
				self.loosen();
				None
			},
			Err(e) if e.to_string().contains(EMPTY_TX_LIST_ERROR) => {
				warn!(chain = %self.chain.name, height = self.cursor, error = %e, "Skipping undecodable block");
				self.cursor += 1;
				self.loosen();
				None
			},
			Err(e) => {
				warn!(chain = %self.chain.name, height = self.cursor, error = %e, "Failed to fetch block");
				self.loosen();
				None
			},
		}
	}

	/// Emits blocks in height order until shutdown or until the receiver
	/// goes away.
	#[instrument(skip_all, fields(chain = %self.chain.name))]
	pub async fn run(mut self, blocks: mpsc::Sender<BlockInfo>, mut shutdown: watch::Receiver<bool>) {
		while let Err(e) = self.start().await {
			warn!(error = %e, "Failed to read chain tip, retrying");
			tokio::select! {
				_ = tokio::time::sleep(self.interval) => {}
				_ = shutdown.changed() => return,
			}
		}

		loop {
			if let Some(block) = self.poll_once().await {
				tokio::select! {
					sent = blocks.send(block) => {
						if sent.is_err() {
							debug!("Block receiver closed");
							return;
						}
					}
					_ = shutdown.changed() => return,
				}
			}

			tokio::select! {
				_ = tokio::time::sleep(self.interval) => {}
				_ = shutdown.changed() => return,
			}
		}
	}

	fn found(&mut self, block: BlockInfo) -> BlockInfo {
		debug!(chain = %self.chain.name, height = block.number, txs = block.transactions.len(), "Fetched block");
		self.cursor += 1;
		self.interval = self
			.interval
			.saturating_sub(self.adjust / 4)
			.max(self.min_wait);
		block
	}

	fn loosen(&mut self) {
		self.interval = (self.interval + self.adjust).min(self.max_wait);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::B256;
	use payout_delivery::MockChainClient;

	fn chain(threshold: i64) -> Chain {
		Chain {
			name: "testchain".into(),
			id: 31337,
			block_time_ms: 2000,
			adjust_time_ms: 1000,
			threshold,
			use_external_rpc: false,
			rpc_urls: vec![],
			eip1559: true,
			nft_contract: None,
			tokens: vec![],
		}
	}

	fn block(number: u64) -> BlockInfo {
		BlockInfo {
			number,
			hash: B256::with_last_byte(number as u8),
			transactions: vec![],
		}
	}

	fn settings() -> WatcherSettings {
		WatcherSettings {
			min_wait: Duration::from_millis(500),
			max_wait: Duration::from_secs(10),
			..Default::default()
		}
	}

	#[tokio::test]
	async fn test_start_trails_tip_by_threshold() {
		let mut client = MockChainClient::new();
		client.expect_block_number().returning(|| Ok(100));
		let mut fetcher = BlockFetcher::new(chain(12), Arc::new(client), &settings());
		fetcher.start().await.unwrap();
		assert_eq!(fetcher.cursor(), 88);

		let mut client = MockChainClient::new();
		client.expect_block_number().returning(|| Ok(3));
		let mut fetcher = BlockFetcher::new(chain(12), Arc::new(client), &settings());
		fetcher.start().await.unwrap();
		assert_eq!(fetcher.cursor(), 0);

		// A negative threshold is treated as zero.
		let mut client = MockChainClient::new();
		client.expect_block_number().returning(|| Ok(100));
		let mut fetcher = BlockFetcher::new(chain(-4), Arc::new(client), &settings());
		fetcher.start().await.unwrap();
		assert_eq!(fetcher.cursor(), 100);
	}

	#[tokio::test]
	async fn test_interval_tightens_to_floor_when_blocks_available() {
		let mut client = MockChainClient::new();
		client.expect_block_at().returning(|h| Ok(block(h)));
		let mut fetcher = BlockFetcher::new(chain(0), Arc::new(client), &settings());

		let mut previous = fetcher.interval();
		for expected_height in 0..20 {
			let block = fetcher.poll_once().await.unwrap();
			assert_eq!(block.number, expected_height);
			assert!(fetcher.interval() <= previous);
			assert!(fetcher.interval() >= Duration::from_millis(500));
			previous = fetcher.interval();
		}
		assert_eq!(fetcher.interval(), Duration::from_millis(500));
		assert_eq!(fetcher.cursor(), 20);
	}

	#[tokio::test(start_paused = true)]
	async fn test_interval_loosens_to_cap_when_blocks_missing() {
		let mut client = MockChainClient::new();
		client
			.expect_block_at()
			.returning(|h| Err(DeliveryError::BlockNotFound(h)));
		let mut fetcher = BlockFetcher::new(chain(0), Arc::new(client), &settings());

		let mut previous = fetcher.interval();
		for _ in 0..20 {
			assert!(fetcher.poll_once().await.is_none());
			assert!(fetcher.interval() >= previous);
			assert!(fetcher.interval() <= Duration::from_secs(10));
			previous = fetcher.interval();
		}
		assert_eq!(fetcher.interval(), Duration::from_secs(10));
		assert_eq!(fetcher.cursor(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_not_found_retries_once() {
		let mut client = MockChainClient::new();
		let mut seq = mockall::Sequence::new();
		client
			.expect_block_at()
			.times(1)
			.in_sequence(&mut seq)
			.returning(|h| Err(DeliveryError::BlockNotFound(h)));
		client
			.expect_block_at()
			.times(1)
			.in_sequence(&mut seq)
			.returning(|h| Ok(block(h)));
		let mut fetcher = BlockFetcher::new(chain(0), Arc::new(client), &settings());

		assert_eq!(fetcher.poll_once().await.unwrap().number, 0);
		assert_eq!(fetcher.cursor(), 1);
	}

	fn empty_tx_list() -> DeliveryError {
		DeliveryError::Network(
			"server returned empty transaction list but block header indicates transactions".into(),
		)
	}

	#[tokio::test]
	async fn test_height_exceeded_and_quirk() {
		let mut client = MockChainClient::new();
		client.expect_block_at().returning(|h| match h {
			0 => Err(empty_tx_list()),
			_ => Err(DeliveryError::HeightExceeded {
				requested: h,
				safe_tip: 0,
			}),
		});
		let mut fetcher = BlockFetcher::new(chain(0), Arc::new(client), &settings());
		let initial = fetcher.interval();

		// Quirk: advances past the block and slows down.
		assert!(fetcher.poll_once().await.is_none());
		assert_eq!(fetcher.cursor(), 1);
		assert_eq!(fetcher.interval(), initial + Duration::from_secs(1));

		// Beyond the safe tip: holds position and slows down.
		assert!(fetcher.poll_once().await.is_none());
		assert_eq!(fetcher.cursor(), 1);
		assert_eq!(fetcher.interval(), initial + Duration::from_secs(2));
	}

	#[tokio::test]
	async fn test_repeated_quirks_loosen_to_cap() {
		let mut client = MockChainClient::new();
		client.expect_block_at().returning(|_| Err(empty_tx_list()));
		let mut fetcher = BlockFetcher::new(chain(0), Arc::new(client), &settings());

		for height in 1..=20 {
			assert!(fetcher.poll_once().await.is_none());
			assert_eq!(fetcher.cursor(), height);
		}
		assert_eq!(fetcher.interval(), Duration::from_secs(10));
	}

	#[tokio::test(start_paused = true)]
	async fn test_run_emits_in_order_and_stops() {
		let mut client = MockChainClient::new();
		client.expect_block_number().returning(|| Ok(5));
		client.expect_block_at().returning(|h| {
			if h <= 7 {
				Ok(block(h))
			} else {
				Err(DeliveryError::HeightExceeded {
					requested: h,
					safe_tip: 7,
				})
			}
		});
		let fetcher = BlockFetcher::new(chain(0), Arc::new(client), &settings());
		let (tx, mut rx) = mpsc::channel(4);
		let (stop, shutdown) = watch::channel(false);
		let handle = tokio::spawn(fetcher.run(tx, shutdown));

		for expected in 5..=7 {
			assert_eq!(rx.recv().await.unwrap().number, expected);
		}
		stop.send(true).unwrap();
		handle.await.unwrap();
	}
}
