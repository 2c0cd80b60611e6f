//! Storage module for the payout dispatcher.
//!
//! Two kinds of storage live here. The key-value cache (`StorageInterface`
//! and `StorageService`) holds ephemeral shared state such as the set of
//! transactions the watcher is waiting for. The repositories
//! (`repositories`) are the ledger of rewards, chains, communities, NFTs and
//! blockchain transactions, with real begin/commit/rollback semantics.

use async_trait::async_trait;
use payout_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod repositories;

/// Re-export implementations
pub mod implementations {
	pub mod ledger;
	pub mod memory;
}

pub use repositories::{
	ChainRepository, CommunityRepository, Ledger, LedgerTransaction, NftRepository,
	Repositories, RepositoryError, RewardRepository, TransactionRepository,
};

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found")]
	NotFound,
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Backend error: {0}")]
	Backend(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Low-level key-value backend.
///
/// Implementations must tolerate concurrent callers: one task may insert a
/// key while another tests and deletes a different one.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries and returns how many were removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Factory signature every cache backend provides.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// All cache backends, as (configuration name, factory) pairs.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::memory;

	vec![(memory::Registry::NAME, memory::Registry::factory())]
}

/// Typed, namespaced access to a cache backend.
///
/// Keys are formed as `namespace:id`; values are JSON.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend
			.set_bytes(&Self::key(namespace, id), bytes, ttl)
			.await
	}

	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}

	/// Removes the key and reports whether it was present.
	///
	/// Callers that are the only consumer of a namespace use this as an
	/// exactly-once claim on a key.
	pub async fn take(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		let key = Self::key(namespace, id);
		if !self.backend.exists(&key).await? {
			return Ok(false);
		}
		self.backend.delete(&key).await?;
		Ok(true)
	}

	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}
