//! Conversion from human-readable reward amounts to on-chain base units.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors converting a decimal amount to token base units.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
	#[error("amount must not be negative: {0}")]
	Negative(Decimal),
	#[error("amount {amount} has more than {decimals} decimal places")]
	TooPrecise { amount: Decimal, decimals: u8 },
	#[error("amount overflows 256 bits")]
	Overflow,
}

/// Converts `amount` to an integer number of base units for a token with
/// `decimals` decimals, i.e. `amount * 10^decimals`.
///
/// Amounts that cannot be represented exactly are rejected instead of being
/// rounded, so a payout never silently differs from the ledger.
pub fn to_base_units(amount: Decimal, decimals: u8) -> Result<U256, ConversionError> {
	if amount.is_sign_negative() && !amount.is_zero() {
		return Err(ConversionError::Negative(amount));
	}

	let normalized = amount.normalize();
	let scale = normalized.scale();
	if scale > decimals as u32 {
		return Err(ConversionError::TooPrecise { amount, decimals });
	}

	let mantissa = U256::from(normalized.mantissa().unsigned_abs());
	let factor = U256::from(10u8).pow(U256::from(decimals as u32 - scale));
	mantissa
		.checked_mul(factor)
		.ok_or(ConversionError::Overflow)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::str::FromStr;

	#[test]
	fn test_whole_and_fractional_amounts() {
		let five = Decimal::from_str("5.0").unwrap();
		assert_eq!(
			to_base_units(five, 18).unwrap(),
			U256::from(5u64) * U256::from(10u64).pow(U256::from(18u64))
		);

		let small = Decimal::from_str("0.25").unwrap();
		assert_eq!(to_base_units(small, 6).unwrap(), U256::from(250_000u64));

		assert_eq!(to_base_units(Decimal::from(3), 0).unwrap(), U256::from(3u64));
	}

	#[test]
	fn test_rejects_inexact_and_negative() {
		let precise = Decimal::from_str("1.234").unwrap();
		assert!(matches!(
			to_base_units(precise, 2),
			Err(ConversionError::TooPrecise { .. })
		));

		let negative = Decimal::from_str("-1").unwrap();
		assert!(matches!(
			to_base_units(negative, 18),
			Err(ConversionError::Negative(_))
		));
	}

	#[test]
	fn test_trailing_zeros_do_not_count_as_precision() {
		let amount = Decimal::from_str("1.500000").unwrap();
		assert_eq!(to_base_units(amount, 1).unwrap(), U256::from(15u64));
	}
}
