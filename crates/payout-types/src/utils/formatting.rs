//! Hex formatting helpers for hashes and bytecode.

use alloy::primitives::B256;

/// Strips a "0x" or "0X" prefix if present.
pub fn without_0x_prefix(hex_str: &str) -> &str {
	hex_str
		.strip_prefix("0x")
		.or_else(|| hex_str.strip_prefix("0X"))
		.unwrap_or(hex_str)
}

/// Full lowercase 0x-prefixed hex of a transaction hash.
///
/// Used wherever a hash becomes part of a storage key, so the same hash
/// always maps to the same key.
pub fn format_hash(hash: &B256) -> String {
	format!("{:#x}", hash)
}
