//! Decimal normalization between an asset's native precision and the
//! canonical 18-decimal accounting unit.

use thiserror::Error;

use crate::{error::ErrorKind, primitives::Balance};

/// Decimal count of the canonical accounting unit.
pub const CANONICAL_DECIMALS: u8 = 18;

/// 10^18, one whole canonical token.
pub const CANONICAL_ONE: Balance = 1_000_000_000_000_000_000;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("arithmetic overflow")]
    Overflow,
}

impl NormalizeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Arithmetic
    }

    pub fn tag(&self) -> &'static str {
        "ERR:OVERFLOW"
    }
}

/// Convert `raw`, expressed with `decimals` places, into canonical units.
///
/// Scales up by `10^(18 - d)` for `d <= 18` and fails on overflow; scales
/// down by `10^(d - 18)` for `d > 18`, truncating.
pub fn to_canonical(raw: Balance, decimals: u8) -> Result<Balance, NormalizeError> {
    if decimals <= CANONICAL_DECIMALS {
        let factor = pow10(u32::from(CANONICAL_DECIMALS - decimals)).ok_or(NormalizeError::Overflow)?;
        raw.checked_mul(factor).ok_or(NormalizeError::Overflow)
    } else {
        Ok(shrink(raw, u32::from(decimals - CANONICAL_DECIMALS)))
    }
}

/// Convert canonical units back into an asset's native precision.
/// Always floors so a payout never exceeds the recorded value.
pub fn from_canonical(canonical: Balance, decimals: u8) -> Result<Balance, NormalizeError> {
    if decimals <= CANONICAL_DECIMALS {
        Ok(shrink(canonical, u32::from(CANONICAL_DECIMALS - decimals)))
    } else {
        let factor = pow10(u32::from(decimals - CANONICAL_DECIMALS)).ok_or(NormalizeError::Overflow)?;
        canonical.checked_mul(factor).ok_or(NormalizeError::Overflow)
    }
}

/// Whole-token count to canonical units (`n * 10^18`).
pub fn whole_to_canonical(whole: Balance) -> Result<Balance, NormalizeError> {
    whole.checked_mul(CANONICAL_ONE).ok_or(NormalizeError::Overflow)
}

#[inline]
fn pow10(exp: u32) -> Option<Balance> {
    10u128.checked_pow(exp)
}

/// `value / 10^exp`; a divisor past u128 range always yields zero.
#[inline]
fn shrink(value: Balance, exp: u32) -> Balance {
    match pow10(exp) {
        Some(div) => value / div,
        None => 0,
    }
}
