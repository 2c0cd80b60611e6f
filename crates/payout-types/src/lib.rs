//! Common types module for the payout dispatcher.
//!
//! This module defines the data model shared by every crate in the workspace:
//! chains and tokens, pending rewards and the communities that fund them,
//! blockchain transaction records, and the transient values that flow
//! between the dispatcher and the watcher pipeline.

/// Chain and token definitions.
pub mod chain;
/// Dispatch results and their error classification.
pub mod dispatch;
/// Implementation registry used by pluggable backends.
pub mod registry;
/// Pending rewards, communities and NFTs.
pub mod reward;
/// Secret string wrapper for platform secrets.
pub mod secret_string;
/// Blockchain transaction records and on-chain observations.
pub mod transaction;
/// Utility functions for hex formatting and amount conversion.
pub mod utils;
/// Configuration validation types.
pub mod validation;

pub use chain::{Chain, Token, TokenRef};
pub use dispatch::{DispatchErrorKind, DispatchResult};
pub use registry::ImplementationRegistry;
pub use reward::{Community, InvalidReward, MintHistory, Nft, PendingReward, RewardAsset, RewardStatus};
pub use secret_string::SecretString;
pub use transaction::{
	BlockInfo, BlockchainTransaction, ObservedTx, ReceiptInfo, TrackResult, TrackUpdate,
	TransactionStatus,
};
pub use utils::{current_timestamp, format_hash, to_base_units, without_0x_prefix, ConversionError};
pub use validation::*;
