//! Configuration module for the payout dispatcher.
//!
//! Configuration is read from TOML. Values may reference environment
//! variables as `${VAR}` or `${VAR:-default}`, which is how the platform
//! secret is normally supplied. Large deployments can split the file with
//! `include = ["chains.toml"]`; every top-level section must then appear in
//! exactly one file.

mod loader;

use payout_types::{Chain, SecretString};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message only; the default rendering dumps the whole input.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub service: ServiceConfig,
	#[serde(default)]
	pub rpc: RpcConfig,
	#[serde(default)]
	pub watcher: WatcherConfig,
	pub storage: StorageConfig,
	/// Chains seeded into the chain store at startup.
	#[serde(default)]
	pub chains: Vec<Chain>,
	pub api: Option<ApiConfig>,
}

/// Settings of the manager loop and the platform wallets.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Identifier of this dispatcher instance, used in logs.
	pub id: String,
	/// Secret from which every community wallet key is derived.
	pub platform_secret: SecretString,
	/// Delay between two pending-reward scans.
	#[serde(default = "default_scan_interval_seconds")]
	pub scan_interval_seconds: u64,
	/// Age after which an in-progress transaction is checked by hash.
	#[serde(default = "default_stale_after_seconds")]
	pub stale_after_seconds: u64,
	/// Derivation nonce of the platform wallet that deploys NFT contracts.
	#[serde(default = "default_deployer_wallet_nonce")]
	pub deployer_wallet_nonce: String,
	/// Hex creation bytecode of the reward NFT contract.
	#[serde(default)]
	pub nft_contract_bytecode: Option<String>,
}

fn default_scan_interval_seconds() -> u64 {
	30
}

fn default_stale_after_seconds() -> u64 {
	600
}

fn default_deployer_wallet_nonce() -> String {
	"platform-deployer".to_string()
}

/// RPC health pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
	pub health_check_interval_seconds: u64,
	/// Timeout of the "latest block" probe sent to each candidate.
	pub probe_timeout_seconds: u64,
	/// Timeout applied to every RPC call made through the pool.
	pub request_timeout_seconds: u64,
	/// Maximum distance in blocks from the median height for an endpoint to
	/// count as healthy.
	pub height_tolerance: u64,
	/// Page listing public RPC endpoints. `{chain_id}` is substituted.
	pub external_rpc_url: String,
}

impl Default for RpcConfig {
	fn default() -> Self {
		Self {
			health_check_interval_seconds: 600,
			probe_timeout_seconds: 5,
			request_timeout_seconds: 5,
			height_tolerance: 5,
			external_rpc_url: "https://chainlist.org/chain/{chain_id}".to_string(),
		}
	}
}

impl RpcConfig {
	pub fn health_check_interval(&self) -> Duration {
		Duration::from_secs(self.health_check_interval_seconds)
	}

	pub fn probe_timeout(&self) -> Duration {
		Duration::from_secs(self.probe_timeout_seconds)
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_seconds)
	}
}

/// Block and receipt pipeline settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatcherConfig {
	/// Floor of the adaptive block poll interval.
	pub min_wait_ms: u64,
	/// Cap of the adaptive block poll interval.
	pub max_wait_ms: u64,
	pub receipt_max_attempts: u32,
	pub receipt_backoff_seconds: u64,
	pub receipt_queue_capacity: usize,
	pub block_queue_capacity: usize,
	pub update_queue_capacity: usize,
	/// How long a tracked hash stays in the cache if no block ever matches it.
	pub tracked_ttl_seconds: u64,
}

impl Default for WatcherConfig {
	fn default() -> Self {
		Self {
			min_wait_ms: 500,
			max_wait_ms: 60_000,
			receipt_max_attempts: 5,
			receipt_backoff_seconds: 5,
			receipt_queue_capacity: 20,
			block_queue_capacity: 64,
			update_queue_capacity: 64,
			tracked_ttl_seconds: 86_400,
		}
	}
}

/// Configuration of the shared key-value cache backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use.
	pub primary: String,
	/// Map of implementation names to their raw configuration.
	pub implementations: HashMap<String, toml::Value>,
	/// Interval in seconds between expired-entry sweeps.
	pub cleanup_interval_seconds: u64,
}

/// Configuration of the HTTP façade.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default = "default_api_host")]
	pub host: String,
	#[serde(default = "default_api_port")]
	pub port: u16,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

/// Resolves `${VAR}` and `${VAR:-default}` references.
///
/// Input is limited to 1MB to bound regex work.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut output = String::with_capacity(input.len());
	let mut last = 0;
	for cap in re.captures_iter(input) {
		let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match std::env::var(name.as_str()) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						name.as_str()
					)))
				},
			},
		};
		output.push_str(&input[last..whole.start()]);
		output.push_str(&value);
		last = whole.end();
	}
	output.push_str(&input[last..]);

	Ok(output)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;

		loader::ConfigLoader::new(base_dir).load_config(file_name).await
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.is_empty() {
			return Err(ConfigError::Validation("Service ID cannot be empty".into()));
		}
		if self.service.platform_secret.is_empty() {
			return Err(ConfigError::Validation(
				"platform_secret cannot be empty".into(),
			));
		}
		if self.service.scan_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"scan_interval_seconds must be greater than 0".into(),
			));
		}

		if self.storage.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Storage primary implementation cannot be empty".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}
		if self.storage.cleanup_interval_seconds == 0
			|| self.storage.cleanup_interval_seconds > 86400
		{
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_seconds must be between 1 and 86400".into(),
			));
		}

		if self.watcher.min_wait_ms == 0 || self.watcher.min_wait_ms > self.watcher.max_wait_ms {
			return Err(ConfigError::Validation(
				"watcher.min_wait_ms must be positive and not exceed max_wait_ms".into(),
			));
		}
		if self.watcher.receipt_max_attempts == 0 {
			return Err(ConfigError::Validation(
				"watcher.receipt_max_attempts must be at least 1".into(),
			));
		}
		if self.watcher.receipt_queue_capacity == 0
			|| self.watcher.block_queue_capacity == 0
			|| self.watcher.update_queue_capacity == 0
		{
			return Err(ConfigError::Validation(
				"watcher queue capacities must be greater than 0".into(),
			));
		}
		if self.watcher.tracked_ttl_seconds == 0 {
			return Err(ConfigError::Validation(
				"watcher.tracked_ttl_seconds must be greater than 0".into(),
			));
		}

		self.validate_chains()
	}

	fn validate_chains(&self) -> Result<(), ConfigError> {
		let mut names = HashSet::new();
		for chain in &self.chains {
			if chain.name.is_empty() {
				return Err(ConfigError::Validation("Chain name cannot be empty".into()));
			}
			if !names.insert(chain.name.as_str()) {
				return Err(ConfigError::Validation(format!(
					"Duplicate chain '{}'",
					chain.name
				)));
			}
			if chain.rpc_urls.is_empty() && !chain.use_external_rpc {
				return Err(ConfigError::Validation(format!(
					"Chain '{}' needs rpc_urls or use_external_rpc",
					chain.name
				)));
			}
			if let Some(url) = chain
				.rpc_urls
				.iter()
				.find(|u| !(u.starts_with("http://") || u.starts_with("https://")))
			{
				return Err(ConfigError::Validation(format!(
					"Chain '{}' has a non-HTTP RPC URL: {}",
					chain.name, url
				)));
			}
			if chain.block_time_ms == 0 {
				return Err(ConfigError::Validation(format!(
					"Chain '{}' block_time_ms must be greater than 0",
					chain.name
				)));
			}
		}
		Ok(())
	}
}

/// Parses, resolves environment variables and validates.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
