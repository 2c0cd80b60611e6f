//! Loader for configuration split across several files.
//!
//! The entry file may carry `include = "file.toml"` or
//! `include = ["a.toml", "b.toml"]`. Included files are resolved relative to
//! the entry file's directory, may not include each other in a cycle, and may
//! not redefine a top-level section defined elsewhere.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub struct ConfigLoader {
	base_path: PathBuf,
	/// Canonical paths already read, for cycle detection.
	loaded_files: HashSet<PathBuf>,
	/// Top-level section name to the file that defined it.
	section_sources: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	pub fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			loaded_files: HashSet::new(),
			section_sources: HashMap::new(),
		}
	}

	/// Loads the entry file and its includes into a validated `Config`.
	pub async fn load_config(
		&mut self,
		config_path: impl AsRef<Path>,
	) -> Result<Config, ConfigError> {
		let entry_path = self.resolve_path(config_path)?;
		let mut combined = self.read_toml(&entry_path).await?;

		let includes = match combined.as_table_mut() {
			Some(table) => extract_includes(table.remove("include"))?,
			None => Vec::new(),
		};
		self.record_sections(&combined, &entry_path)?;

		for include in includes {
			let path = self.resolve_path(&include)?;
			let included = self.read_toml(&path).await?;
			if included.get("include").is_some() {
				return Err(ConfigError::Validation(format!(
					"Nested include in {} is not supported",
					path.display()
				)));
			}
			self.record_sections(&included, &path)?;

			if let (Some(target), Some(source)) = (combined.as_table_mut(), included.as_table()) {
				for (key, value) in source {
					target.insert(key.clone(), value.clone());
				}
			}
		}

		let serialized = toml::to_string(&combined).map_err(|e| {
			ConfigError::Parse(format!("Failed to serialize combined config: {}", e))
		})?;
		serialized.parse()
	}

	/// Reads a file, resolves environment variables and parses TOML.
	async fn read_toml(&mut self, path: &Path) -> Result<toml::Value, ConfigError> {
		let canonical = path.canonicalize().map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Cannot resolve path {}: {}", path.display(), e),
			))
		})?;
		if !self.loaded_files.insert(canonical.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical.display()
			)));
		}

		let content = tokio::fs::read_to_string(path).await?;
		let resolved = resolve_env_vars(&content)?;
		Ok(toml::from_str(&resolved)?)
	}

	fn record_sections(&mut self, value: &toml::Value, source: &Path) -> Result<(), ConfigError> {
		let Some(table) = value.as_table() else {
			return Ok(());
		};
		for key in table.keys().filter(|k| k.as_str() != "include") {
			if let Some(existing) = self.section_sources.get(key) {
				if existing != source {
					return Err(ConfigError::Validation(format!(
						"Duplicate section '{}' found in {} and {}. \
						Each top-level section must be unique across all configuration files.",
						key,
						existing.display(),
						source.display()
					)));
				}
			}
			self.section_sources
				.insert(key.clone(), source.to_path_buf());
		}
		Ok(())
	}

	fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
		let path = path.as_ref();
		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_path.join(path)
		};

		if !resolved.exists() {
			return Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", resolved.display()),
			)));
		}
		Ok(resolved)
	}
}

fn extract_includes(value: Option<toml::Value>) -> Result<Vec<PathBuf>, ConfigError> {
	match value {
		None => Ok(Vec::new()),
		Some(toml::Value::String(path)) => Ok(vec![PathBuf::from(path)]),
		Some(toml::Value::Array(items)) => items
			.into_iter()
			.map(|item| match item {
				toml::Value::String(path) => Ok(PathBuf::from(path)),
				_ => Err(ConfigError::Validation(
					"Include array must contain only strings".into(),
				)),
			})
			.collect(),
		Some(_) => Err(ConfigError::Validation(
			"Include must be a string or array of strings".into(),
		)),
	}
}
