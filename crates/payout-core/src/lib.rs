//! Reward payout orchestration.
//!
//! The manager brings chains online as they appear in the chain store,
//! groups pending rewards into batches, and drives each batch through the
//! insert, link, dispatch, track and commit sequence. The façade exposes
//! the direct chain operations the service serves over HTTP.

use payout_delivery::DeliveryError;
use payout_storage::{RepositoryError, StorageError};
use payout_watcher::WatcherError;
use thiserror::Error;

pub mod batching;
pub mod builder;
pub mod facade;
pub mod factory;
pub mod manager;
pub mod registry;

pub use batching::{group_rewards, Batches, FungibleBatch, NftBatch, NftItem, NonceResolver};
pub use builder::{PayoutBuilder, PayoutEngine};
pub use facade::{DeployedContract, PayoutFacade};
pub use factory::EvmChainFactory;
pub use manager::{DispatchOutcome, PayoutManager};
pub use registry::{ChainFactory, ChainHandle, ChainRegistry};

#[derive(Debug, Error)]
pub enum ManagerError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Chain {0} is not active")]
	UnknownChain(String),
	#[error("Invalid reward: {0}")]
	InvalidReward(String),
	#[error("Dispatch failed: {0}")]
	Dispatch(String),
	#[error("Repository error: {0}")]
	Repository(String),
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Delivery error: {0}")]
	Delivery(String),
	#[error("Watcher error: {0}")]
	Watcher(String),
}

impl From<RepositoryError> for ManagerError {
	fn from(e: RepositoryError) -> Self {
		Self::Repository(e.to_string())
	}
}

impl From<StorageError> for ManagerError {
	fn from(e: StorageError) -> Self {
		Self::Storage(e.to_string())
	}
}

impl From<DeliveryError> for ManagerError {
	fn from(e: DeliveryError) -> Self {
		Self::Delivery(e.to_string())
	}
}

impl From<WatcherError> for ManagerError {
	fn from(e: WatcherError) -> Self {
		Self::Watcher(e.to_string())
	}
}
