//! Conversions between human readable decimal amounts and on-chain base units

use std::str::FromStr;

use alloy_primitives::U256;
use bigdecimal::{
    num_bigint::{BigInt, Sign},
    BigDecimal, RoundingMode,
};

use crate::error::OkxClientError;

/// Convert a human readable amount into base units at the given decimals
///
/// Digits beyond the token's precision are truncated toward zero; the result
/// never exceeds the requested amount.
pub fn to_base_units(amount: &BigDecimal, decimals: u8) -> Result<U256, OkxClientError> {
    let truncated = amount.with_scale_round(i64::from(decimals), RoundingMode::Down);
    let (digits, _scale) = truncated.into_bigint_and_scale();

    let unsigned = digits
        .to_biguint()
        .ok_or_else(|| OkxClientError::parsing(format!("negative amount: {amount}")))?;
    U256::try_from_be_slice(&unsigned.to_bytes_be())
        .ok_or_else(|| OkxClientError::parsing(format!("amount overflows U256: {amount}")))
}

/// Convert a base-unit amount into a human readable decimal amount
pub fn from_base_units(amount: U256, decimals: u8) -> BigDecimal {
    let digits = BigInt::from_bytes_be(Sign::Plus, &amount.to_be_bytes::<32>());
    BigDecimal::new(digits, i64::from(decimals))
}

/// Parse an unsigned integer the API sent as a string, either decimal or
/// `0x`-prefixed hex
pub fn parse_uint(s: &str) -> Result<U256, OkxClientError> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(s, 10),
    };

    parsed.map_err(|e| OkxClientError::parsing(format!("invalid integer {s:?}: {e}")))
}

/// Parse a human readable decimal string
pub fn parse_decimal(s: &str) -> Result<BigDecimal, OkxClientError> {
    BigDecimal::from_str(s.trim())
        .map_err(|e| OkxClientError::parsing(format!("invalid decimal {s:?}: {e}")))
}
