//! Dispatch result types.
//!
//! A dispatch never fails with an error value; every outcome is described by
//! a `DispatchResult` that the caller branches on.

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a dispatch outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum DispatchErrorKind {
	None,
	Generic,
	InsufficientBalance,
	SerializationFailure,
	SubmissionFailure,
	NonceMismatch,
}

impl fmt::Display for DispatchErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::None => "none",
			Self::Generic => "generic",
			Self::InsufficientBalance => "insufficient balance",
			Self::SerializationFailure => "serialization failure",
			Self::SubmissionFailure => "submission failure",
			Self::NonceMismatch => "nonce mismatch",
		};
		f.write_str(s)
	}
}

/// Result of submitting one signed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DispatchResult {
	pub chain: String,
	pub tx_hash: B256,
	pub success: bool,
	pub error: DispatchErrorKind,
	/// Underlying error text, when there was one.
	pub message: Option<String>,
}

impl DispatchResult {
	pub fn success(chain: impl Into<String>, tx_hash: B256) -> Self {
		Self {
			chain: chain.into(),
			tx_hash,
			success: true,
			error: DispatchErrorKind::None,
			message: None,
		}
	}

	pub fn failure(
		chain: impl Into<String>,
		tx_hash: B256,
		error: DispatchErrorKind,
		message: impl Into<String>,
	) -> Self {
		Self {
			chain: chain.into(),
			tx_hash,
			success: false,
			error,
			message: Some(message.into()),
		}
	}
}
