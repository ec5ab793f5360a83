//! KERC genesis supply split.
//!
//! 500M tokens are minted once at creation: ecosystem 350M, operations 75M,
//! team vesting 50M and a 25M reserve out of which the partner vesting
//! allocation is carved.

use std::fmt;

use thiserror::Error;

use crate::{
    error::ErrorKind,
    ledger::{Issuer, LedgerError},
    normalize::CANONICAL_ONE,
    primitives::{Address, Balance},
};

pub const TOTAL_SUPPLY_WHOLE: Balance = 500_000_000;
pub const ECOSYSTEM_WHOLE: Balance = 350_000_000;
pub const OPERATIONS_WHOLE: Balance = 75_000_000;
pub const RESERVE_WHOLE: Balance = 25_000_000;
pub const TEAM_VESTING_WHOLE: Balance = 50_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Ecosystem,
    Operations,
    Reserve,
    TeamVesting,
    PartnerVesting,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Ecosystem => "ecosystem",
            Role::Operations => "operations",
            Role::Reserve => "reserve",
            Role::TeamVesting => "team_vesting",
            Role::PartnerVesting => "partner_vesting",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("zero recipient for {0}")]
    ZeroAddress(Role),
    #[error("partner allocation {0} exceeds the reserve")]
    PartnerExceedsReserve(Balance),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

impl AllocationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AllocationError::ZeroAddress(_) | AllocationError::PartnerExceedsReserve(_) => ErrorKind::Validation,
            AllocationError::Ledger(e) => e.kind(),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            AllocationError::ZeroAddress(_) => "ERR:ZERO_ADDRESS",
            AllocationError::PartnerExceedsReserve(_) => "ERR:PARTNER_EXCEEDS_RESERVE",
            AllocationError::Ledger(e) => e.tag(),
        }
    }
}

/// Recipients of the genesis mint. `partner_whole` is a whole-token count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenesisAllocation {
    pub ecosystem: Address,
    pub operations: Address,
    pub reserve: Address,
    pub team_vesting: Address,
    pub partner_vesting: Address,
    pub partner_whole: Balance,
}

/// One mint of the genesis plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Grant {
    pub role: Role,
    pub to: Address,
    pub amount: Balance,
}

impl GenesisAllocation {
    /// Validated list of mints, canonical units. Sums to the total supply.
    pub fn plan(&self) -> Result<Vec<Grant>, AllocationError> {
        if self.partner_whole > RESERVE_WHOLE {
            return Err(AllocationError::PartnerExceedsReserve(self.partner_whole));
        }
        let entries = [
            (Role::Ecosystem, self.ecosystem, ECOSYSTEM_WHOLE),
            (Role::Operations, self.operations, OPERATIONS_WHOLE),
            (Role::Reserve, self.reserve, RESERVE_WHOLE - self.partner_whole),
            (Role::TeamVesting, self.team_vesting, TEAM_VESTING_WHOLE),
            (Role::PartnerVesting, self.partner_vesting, self.partner_whole),
        ];
        entries
            .into_iter()
            .map(|(role, to, whole)| {
                if to.is_zero() {
                    return Err(AllocationError::ZeroAddress(role));
                }
                // whole counts here are bounded by the 500M supply
                Ok(Grant { role, to, amount: whole * CANONICAL_ONE })
            })
            .collect()
    }

    /// Mint the whole plan of `token` through `issuer`. Validates before the
    /// first mint so a bad plan mints nothing.
    pub fn mint_into<I: Issuer>(&self, issuer: &I, token: Address) -> Result<Vec<Grant>, AllocationError> {
        let plan = self.plan()?;
        for g in &plan {
            if g.amount == 0 {
                continue;
            }
            issuer.mint(token, g.to, g.amount)?;
            tracing::info!(target: "ledger", role = %g.role, to = %g.to, amount = g.amount, "genesis mint");
        }
        Ok(plan)
    }
}
