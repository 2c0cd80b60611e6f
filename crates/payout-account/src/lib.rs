//! Deterministic wallet derivation for the payout dispatcher.
//!
//! Every community pays rewards from its own wallet. Wallet keys are never
//! stored: they are derived on demand from the platform secret and the
//! community's wallet nonce, used for a single signing operation, then
//! dropped.

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use payout_types::SecretString;
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use thiserror::Error;

/// Upper bound on re-hash attempts when a digest is not a valid scalar.
const MAX_DERIVATION_ROUNDS: u32 = 16;

#[derive(Debug, Error)]
pub enum AccountError {
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("Empty platform secret")]
	EmptySecret,
	#[error("Empty wallet nonce")]
	EmptyNonce,
}

/// Derives the signing key for `nonce` under `secret`.
///
/// The key is `keccak256(secret || ":" || nonce || round)`, with `round`
/// starting at zero and incremented only in the negligible case where the
/// digest is zero or not below the curve order.
pub fn derive(secret: &SecretString, nonce: &str) -> Result<PrivateKeySigner, AccountError> {
	if secret.is_empty() {
		return Err(AccountError::EmptySecret);
	}
	if nonce.is_empty() {
		return Err(AccountError::EmptyNonce);
	}

	secret.with_exposed(|secret| {
		for round in 0..MAX_DERIVATION_ROUNDS {
			let mut hasher = Keccak256::new();
			hasher.update(secret.as_bytes());
			hasher.update(b":");
			hasher.update(nonce.as_bytes());
			if round > 0 {
				hasher.update(round.to_be_bytes());
			}
			let digest = B256::from_slice(&hasher.finalize());
			if let Ok(signer) = PrivateKeySigner::from_bytes(&digest) {
				return Ok(signer);
			}
		}
		Err(AccountError::InvalidKey(
			"no valid scalar after maximum derivation rounds".into(),
		))
	})
}

/// Fresh wallet nonce for a community that does not have one yet.
pub fn generate_nonce() -> String {
	hex::encode(uuid::Uuid::new_v4().as_bytes())
}

/// Holds the platform secret and derives community wallets from it.
#[derive(Clone)]
pub struct WalletDeriver {
	secret: Arc<SecretString>,
}

impl WalletDeriver {
	pub fn new(secret: SecretString) -> Self {
		Self {
			secret: Arc::new(secret),
		}
	}

	pub fn signer(&self, nonce: &str) -> Result<PrivateKeySigner, AccountError> {
		derive(&self.secret, nonce)
	}

	/// Public address of the wallet for `nonce`.
	pub fn address(&self, nonce: &str) -> Result<Address, AccountError> {
		Ok(self.signer(nonce)?.address())
	}
}

impl std::fmt::Debug for WalletDeriver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WalletDeriver").finish_non_exhaustive()
	}
}
