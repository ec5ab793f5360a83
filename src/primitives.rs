//! Chain primitives shared by the sale and vesting engines.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Smallest-unit balance. Canonical amounts carry 18 decimals.
pub type Balance = u128;

/// Seconds since Unix epoch, as reported by the ledger clock.
pub type Timestamp = u64;

/// 20-byte account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Address whose last eight bytes hold `n` big-endian. Handy for
    /// deterministic fixtures and generated contract addresses.
    pub fn from_low_u64(n: u64) -> Self {
        let mut a = [0u8; 20];
        a[12..].copy_from_slice(&n.to_be_bytes());
        Address(a)
    }

    /// 0x-prefixed lower-hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse from 0x-prefixed or raw 40-hex string.
    pub fn from_hex(s: &str) -> Result<Self, ParseAddressError> {
        let raw = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        if raw.len() != 40 {
            return Err(ParseAddressError::Length(raw.len()));
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(raw, &mut out).map_err(|_| ParseAddressError::Hex)?;
        Ok(Address(out))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseAddressError {
    #[error("expected 40 hex characters, got {0}")]
    Length(usize),
    #[error("invalid hex")]
    Hex,
}

impl FromStr for Address {
    type Err = ParseAddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(s.trim()).map_err(de::Error::custom)
    }
}

/// Asset understood by the ledger: the chain's native coin or a token contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssetId {
    Native,
    Token(Address),
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetId::Native => f.write_str("native"),
            AssetId::Token(a) => write!(f, "{a}"),
        }
    }
}
