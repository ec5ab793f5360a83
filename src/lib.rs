//! KERC token sale core.
//!
//! - Presale: multi-stablecoin deposits normalized to 18 decimals, global
//!   hard cap, time window with a manual close override, EIP-2612 permit
//!   deposits, sweeps to treasury.
//! - Vesting: one team allocation released along a 12-month-cliff, 52-month
//!   stepped curve to a mutable receiver.
//! - Genesis allocation of the KERC supply.
//!
//! Balances and the clock live in an external ledger reached through
//! [`ledger::Ledger`]; [`memory::MemoryLedger`] is an in-process model of it.
//! Engines publish events on `tokio::broadcast` and log through `tracing`.

#![forbid(unsafe_code)]

pub mod allocation;
pub mod config;
pub mod eip712;
pub mod error;
pub mod ledger;
pub mod math;
pub mod memory;
pub mod normalize;
pub mod presale;
pub mod primitives;
pub mod schedule;
pub mod telemetry;
pub mod vesting;

pub use crate::{
    allocation::{AllocationError, GenesisAllocation},
    config::{ConfigError, PresaleSettings, Settings, TelemetrySettings, VestingSettings},
    eip712::{Eip712Domain, Permit, PermitSignature},
    error::ErrorKind,
    ledger::{Issuer, Ledger, LedgerError},
    memory::MemoryLedger,
    presale::{Presale, PresaleError, PresaleEvent, SaleStatus},
    primitives::{Address, AssetId, Balance, Timestamp},
    vesting::{Vesting, VestingError, VestingEvent, VestingSnapshot},
};
