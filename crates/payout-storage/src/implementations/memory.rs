//! In-memory cache backend.
//!
//! Entries may carry a time-to-live. Expired entries are invisible to reads
//! immediately and are physically removed by `cleanup_expired`.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use payout_types::{ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry {
	value: Vec<u8>,
	expires_at: Option<Instant>,
}

impl Entry {
	fn is_live(&self, now: Instant) -> bool {
		self.expires_at.is_none_or(|at| at > now)
	}
}

/// Cache backed by a `HashMap` behind a read-write lock.
pub struct MemoryStorage {
	store: Arc<RwLock<HashMap<String, Entry>>>,
	default_ttl: Option<Duration>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self {
			store: Arc::new(RwLock::new(HashMap::new())),
			default_ttl: None,
		}
	}

	/// Applies `ttl` to every write that does not specify its own.
	pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
		self.default_ttl = Some(ttl);
		self
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let store = self.store.read().await;
		store
			.get(key)
			.filter(|e| e.is_live(Instant::now()))
			.map(|e| e.value.clone())
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let expires_at = ttl.or(self.default_ttl).map(|ttl| Instant::now() + ttl);
		let mut store = self.store.write().await;
		store.insert(key.to_string(), Entry { value, expires_at });
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let store = self.store.read().await;
		Ok(store.get(key).is_some_and(|e| e.is_live(Instant::now())))
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let now = Instant::now();
		let mut store = self.store.write().await;
		let before = store.len();
		store.retain(|_, entry| entry.is_live(now));
		Ok(before - store.len())
	}
}

pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new(
				"default_ttl_seconds",
				FieldType::Integer {
					min: Some(1),
					max: None,
				},
			)],
		);
		schema.validate(config)
	}
}

/// Builds a memory backend.
///
/// Configuration parameters:
/// - `default_ttl_seconds` (optional): TTL applied to writes without one
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let mut storage = MemoryStorage::new();
	if let Some(secs) = config.get("default_ttl_seconds").and_then(|v| v.as_integer()) {
		storage = storage.with_default_ttl(Duration::from_secs(secs as u64));
	}
	Ok(Box::new(storage))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_basic_operations() {
		let storage = MemoryStorage::new();

		storage.set_bytes("k", b"v".to_vec(), None).await.unwrap();
		assert_eq!(storage.get_bytes("k").await.unwrap(), b"v".to_vec());
		assert!(storage.exists("k").await.unwrap());

		storage.delete("k").await.unwrap();
		assert!(!storage.exists("k").await.unwrap());
		assert!(matches!(
			storage.get_bytes("k").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test(start_paused = true)]
	async fn test_ttl_expiry_and_cleanup() {
		let storage = MemoryStorage::new();
		storage
			.set_bytes("short", b"1".to_vec(), Some(Duration::from_secs(5)))
			.await
			.unwrap();
		storage.set_bytes("forever", b"2".to_vec(), None).await.unwrap();

		tokio::time::advance(Duration::from_secs(6)).await;

		assert!(!storage.exists("short").await.unwrap());
		assert!(storage.exists("forever").await.unwrap());
		assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
		assert_eq!(storage.cleanup_expired().await.unwrap(), 0);
	}

	#[test]
	fn test_factory_rejects_bad_ttl() {
		let config: toml::Value = toml::from_str("default_ttl_seconds = 0").unwrap();
		assert!(matches!(
			create_storage(&config),
			Err(StorageError::Configuration(_))
		));

		let config: toml::Value = toml::from_str("default_ttl_seconds = 60").unwrap();
		assert!(create_storage(&config).is_ok());
	}
}
