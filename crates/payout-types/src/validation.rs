//! Schema validation for raw TOML configuration tables.
//!
//! Backend implementations receive their settings as an untyped
//! `toml::Value`. Each one publishes a `ConfigSchema` so that configuration is
//! rejected with a precise message before the backend is constructed.

use thiserror::Error;

/// Errors produced while validating a configuration table.
#[derive(Debug, Error)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	MissingField(String),
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
}

impl ValidationError {
	/// Prefixes the field path with a parent table name.
	fn nested(self, parent: &str) -> Self {
		match self {
			Self::MissingField(f) => Self::MissingField(format!("{}.{}", parent, f)),
			Self::InvalidValue { field, message } => Self::InvalidValue {
				field: format!("{}.{}", parent, field),
				message,
			},
			Self::TypeMismatch {
				field,
				expected,
				actual,
			} => Self::TypeMismatch {
				field: format!("{}.{}", parent, field),
				expected,
				actual,
			},
		}
	}
}

/// Expected type of a configuration field.
#[derive(Debug)]
pub enum FieldType {
	String,
	Integer { min: Option<i64>, max: Option<i64> },
	Boolean,
	Array(Box<FieldType>),
	Table(Schema),
}

impl FieldType {
	fn check(&self, name: &str, value: &toml::Value) -> Result<(), ValidationError> {
		let mismatch = |expected: &str| ValidationError::TypeMismatch {
			field: name.to_string(),
			expected: expected.to_string(),
			actual: value.type_str().to_string(),
		};

		match self {
			FieldType::String => value.as_str().map(|_| ()).ok_or_else(|| mismatch("string")),
			FieldType::Boolean => value.as_bool().map(|_| ()).ok_or_else(|| mismatch("boolean")),
			FieldType::Integer { min, max } => {
				let v = value.as_integer().ok_or_else(|| mismatch("integer"))?;
				if let Some(min) = min.filter(|min| v < *min) {
					return Err(ValidationError::InvalidValue {
						field: name.to_string(),
						message: format!("Value {} is less than minimum {}", v, min),
					});
				}
				if let Some(max) = max.filter(|max| v > *max) {
					return Err(ValidationError::InvalidValue {
						field: name.to_string(),
						message: format!("Value {} is greater than maximum {}", v, max),
					});
				}
				Ok(())
			},
			FieldType::Array(inner) => {
				let items = value.as_array().ok_or_else(|| mismatch("array"))?;
				for (i, item) in items.iter().enumerate() {
					inner.check(&format!("{}[{}]", name, i), item)?;
				}
				Ok(())
			},
			FieldType::Table(schema) => schema.validate(value).map_err(|e| e.nested(name)),
		}
	}
}

/// Custom check run after the type check succeeds.
pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

/// A named field with a type and optional custom validator.
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}

	fn check(&self, value: &toml::Value) -> Result<(), ValidationError> {
		self.field_type.check(&self.name, value)?;
		if let Some(validator) = &self.validator {
			validator(value).map_err(|message| ValidationError::InvalidValue {
				field: self.name.clone(),
				message,
			})?;
		}
		Ok(())
	}
}

/// Required and optional fields of a configuration table.
#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	/// Validates `config`, which must be a table.
	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config
			.as_table()
			.ok_or_else(|| ValidationError::TypeMismatch {
				field: "root".to_string(),
				expected: "table".to_string(),
				actual: config.type_str().to_string(),
			})?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| ValidationError::MissingField(field.name.clone()))?;
			field.check(value)?;
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				field.check(value)?;
			}
		}

		Ok(())
	}
}

/// Implemented by every pluggable backend to validate its own settings.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}
