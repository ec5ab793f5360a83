//! External ledger abstraction.
//!
//! The sale and vesting engines never hold balances themselves: every
//! monetary side effect and every clock read goes through [`Ledger`]. A host
//! chain implements it over its token contracts; [`crate::memory`] provides
//! an in-process reference model.

use thiserror::Error;

use crate::{
    eip712::PermitSignature,
    error::ErrorKind,
    primitives::{Address, AssetId, Balance, Timestamp},
};

/// Read and write surface of the fungible-token ledger plus the chain clock.
pub trait Ledger: Send + Sync + 'static {
    /// Current block time (seconds). Never decreases.
    fn now_unix(&self) -> Timestamp;

    /// Chain identifier bound into permit domains.
    fn chain_id(&self) -> u64;

    fn balance_of(&self, asset: AssetId, who: Address) -> Result<Balance, LedgerError>;

    fn decimals(&self, token: Address) -> Result<u8, LedgerError>;

    fn name(&self, token: Address) -> Result<String, LedgerError>;

    /// Next unused permit nonce of `owner` on `token`.
    fn nonces(&self, token: Address, owner: Address) -> Result<u64, LedgerError>;

    /// Move `amount` held by `from` to `to`. `from` is the calling contract.
    fn transfer(&self, asset: AssetId, from: Address, to: Address, amount: Balance) -> Result<(), LedgerError>;

    /// Move `amount` from `from` to `to` using the allowance `from` granted `spender`.
    fn transfer_from(
        &self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: Balance,
    ) -> Result<(), LedgerError>;

    /// Verify a signed EIP-2612 permit and grant `spender` an allowance of
    /// `value` over `owner`'s balance. Consumes the owner's current nonce.
    fn permit(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        value: Balance,
        deadline: Timestamp,
        signature: &PermitSignature,
    ) -> Result<(), LedgerError>;
}

/// Supply-changing operations of a token the host controls.
pub trait Issuer: Send + Sync + 'static {
    fn mint(&self, token: Address, to: Address, amount: Balance) -> Result<(), LedgerError>;
    fn burn(&self, token: Address, from: Address, amount: Balance) -> Result<(), LedgerError>;
    fn total_supply(&self, token: Address) -> Result<Balance, LedgerError>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient balance")]
    Insufficient,
    #[error("insufficient allowance")]
    InsufficientAllowance,
    #[error("unknown token {0}")]
    UnknownToken(Address),
    #[error("permit expired")]
    PermitExpired,
    #[error("invalid permit signature: {0}")]
    InvalidSignature(String),
    #[error("permit signer does not match owner")]
    InvalidSigner,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("ledger failure: {0}")]
    Other(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::PermitExpired | LedgerError::InvalidSignature(_) | LedgerError::InvalidSigner => {
                ErrorKind::Authorization
            }
            LedgerError::Overflow => ErrorKind::Arithmetic,
            _ => ErrorKind::Ledger,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            LedgerError::Insufficient => "ERR:INSUFFICIENT_BALANCE",
            LedgerError::InsufficientAllowance => "ERR:INSUFFICIENT_ALLOWANCE",
            LedgerError::UnknownToken(_) => "ERR:UNKNOWN_TOKEN",
            LedgerError::PermitExpired => "ERR:PERMIT_EXPIRED",
            LedgerError::InvalidSignature(_) => "ERR:INVALID_SIGNATURE",
            LedgerError::InvalidSigner => "ERR:INVALID_SIGNER",
            LedgerError::Overflow => "ERR:OVERFLOW",
            LedgerError::Other(_) => "ERR:LEDGER",
        }
    }
}
