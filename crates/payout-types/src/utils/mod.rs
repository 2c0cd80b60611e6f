//! Utility functions for hex formatting and amount conversion.

pub mod conversion;
pub mod formatting;

pub use conversion::{to_base_units, ConversionError};
pub use formatting::{format_hash, without_0x_prefix};

/// Current unix timestamp in seconds, or 0 if the clock is before the epoch.
pub fn current_timestamp() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}
