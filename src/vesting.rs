//! Team token vesting.
//!
//! Holds a fixed allocation of one token and releases it to a receiver along
//! the unlock curve in [`crate::schedule`]:
//! - 12-month cliff, then a stepped monthly ramp reaching 100% at month 52.
//! - Release is permissionless; the payout always goes to the receiver.
//! - Start is one-shot: token, allocation and start time never change again.
//! - The owner may sweep stray assets, but not the vested token before the
//!   schedule has fully elapsed.
//!
//! Time model: seconds since Unix epoch read from the ledger clock.

use std::{fmt, sync::Arc};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::{
    config::{Settings, VestingSettings},
    error::ErrorKind,
    ledger::{Ledger, LedgerError},
    primitives::{Address, AssetId, Balance, Timestamp},
    schedule,
};

/// Events published by the vesting engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VestingEvent {
    /// Schedule started with `allocation` units of `token`.
    Started { token: Address, allocation: Balance, start_time: Timestamp },
    /// `amount` released to `to`.
    Released { to: Address, amount: Balance },
    /// Receiver changed.
    ReceiverUpdated(Address),
    /// Owner swept `amount` of `asset` to `to`.
    EmergencyWithdrawn { asset: AssetId, to: Address, amount: Balance },
}

/// Errors returned by vesting operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VestingError {
    /// Privileged call from someone other than the owner.
    #[error("caller is not the owner")]
    NotOwner,
    /// `start` called on a running schedule.
    #[error("vesting already started")]
    AlreadyStarted,
    /// Zero token, receiver or sweep destination.
    #[error("zero address")]
    ZeroAddress,
    /// Started with an empty allocation.
    #[error("allocation must be > 0")]
    ZeroAllocation,
    /// Nothing vested since the last release.
    #[error("nothing to release")]
    NothingToRelease,
    /// Sweep of the vested token while the schedule is still running.
    #[error("vesting token locked until the schedule completes")]
    CantWithdrawVestingToken,
    /// Overflow detected in arithmetic.
    #[error("arithmetic overflow")]
    Overflow,
    /// Ledger rejected a transfer or balance query.
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

impl VestingError {
    /// Taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VestingError::NotOwner => ErrorKind::Authorization,
            VestingError::ZeroAddress | VestingError::ZeroAllocation => ErrorKind::Validation,
            VestingError::AlreadyStarted
            | VestingError::NothingToRelease
            | VestingError::CantWithdrawVestingToken => ErrorKind::State,
            VestingError::Overflow => ErrorKind::Arithmetic,
            VestingError::Ledger(e) => e.kind(),
        }
    }

    /// Stable reason tag.
    pub fn tag(&self) -> &'static str {
        match self {
            VestingError::NotOwner => "ERR:NOT_OWNER",
            VestingError::AlreadyStarted => "ERR:ALREADY_STARTED",
            VestingError::ZeroAddress => "ERR:ZERO_ADDRESS",
            VestingError::ZeroAllocation => "ERR:ZERO_ALLOCATION",
            VestingError::NothingToRelease => "ERR:NOTHING_TO_RELEASE",
            VestingError::CantWithdrawVestingToken => "ERR:CANT_WITHDRAW_VESTING_TOKEN",
            VestingError::Overflow => "ERR:OVERFLOW",
            VestingError::Ledger(e) => e.tag(),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct VestingState {
    token: Option<Address>,
    total_allocation: Balance,
    start_time: Option<Timestamp>,
    released: Balance,
    receiver: Address,
}

impl VestingState {
    fn vested_at(&self, now: Timestamp) -> Result<Balance, VestingError> {
        match self.start_time {
            None => Ok(0),
            Some(start) => schedule::vested_at(self.total_allocation, start, now).ok_or(VestingError::Overflow),
        }
    }
}

/// Point-in-time view of a schedule, for persistence and dashboards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VestingSnapshot {
    /// Vested token, once started.
    pub token: Option<Address>,
    /// Fixed allocation.
    pub total_allocation: Balance,
    /// Start timestamp, once started.
    pub start_time: Option<Timestamp>,
    /// Amount already paid out.
    pub released: Balance,
    /// Vested amount at `taken_at`.
    pub vested: Balance,
    /// Current receiver.
    pub receiver: Address,
    /// Ledger time of the snapshot.
    pub taken_at: Timestamp,
}

/// Vesting engine bound to one contract address on the ledger.
pub struct Vesting<L: Ledger> {
    ledger: Arc<L>,
    address: Address,
    owner: Address,
    exec: Mutex<()>,
    state: RwLock<VestingState>,
    events_tx: broadcast::Sender<VestingEvent>,
}

impl<L: Ledger> fmt::Debug for Vesting<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.state.read();
        f.debug_struct("Vesting")
            .field("address", &self.address)
            .field("token", &s.token)
            .field("start_time", &s.start_time)
            .field("released", &s.released)
            .finish()
    }
}

impl<L: Ledger> Vesting<L> {
    /// Deploy an unstarted schedule paying out to `settings.receiver`.
    pub fn new(ledger: Arc<L>, settings: &VestingSettings) -> Result<Arc<Self>, VestingError> {
        if settings.address.is_zero() || settings.owner.is_zero() || settings.receiver.is_zero() {
            return Err(VestingError::ZeroAddress);
        }
        let (tx, _) = broadcast::channel(settings.event_capacity.max(1));
        Ok(Arc::new(Self {
            ledger,
            address: settings.address,
            owner: settings.owner,
            exec: Mutex::new(()),
            state: RwLock::new(VestingState { receiver: settings.receiver, ..VestingState::default() }),
            events_tx: tx,
        }))
    }

    /// Deploy and start in one step, the way a token's genesis does it.
    pub fn started(
        ledger: Arc<L>,
        settings: &VestingSettings,
        token: Address,
        allocation: Balance,
    ) -> Result<Arc<Self>, VestingError> {
        let v = Self::new(ledger, settings)?;
        v.start(settings.owner, token, allocation)?;
        Ok(v)
    }

    /// Build from the `vesting` section of loaded settings.
    pub fn from_settings(ledger: Arc<L>, settings: &Settings) -> Result<Arc<Self>, VestingError> {
        Self::new(ledger, &settings.vesting)
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<VestingEvent> {
        self.events_tx.subscribe()
    }

    /// Contract address holding the allocation.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Privileged account.
    pub fn owner(&self) -> Address {
        self.owner
    }

    fn now(&self) -> Timestamp {
        self.ledger.now_unix()
    }

    fn ensure_owner(&self, caller: Address) -> Result<(), VestingError> {
        if caller != self.owner {
            return Err(VestingError::NotOwner);
        }
        Ok(())
    }

    /// Fix token, allocation and start time. One-shot.
    pub fn start(&self, caller: Address, token: Address, allocation: Balance) -> Result<(), VestingError> {
        let _ex = self.exec.lock();
        let res = self.ensure_owner(caller).and_then(|()| {
            let mut s = self.state.write();
            if s.start_time.is_some() {
                return Err(VestingError::AlreadyStarted);
            }
            if token.is_zero() {
                return Err(VestingError::ZeroAddress);
            }
            if allocation == 0 {
                return Err(VestingError::ZeroAllocation);
            }
            let now = self.now();
            s.token = Some(token);
            s.total_allocation = allocation;
            s.start_time = Some(now);
            drop(s);

            tracing::info!(target: "vesting", %token, allocation, start_time = now, "vesting started");
            let _ = self.events_tx.send(VestingEvent::Started { token, allocation, start_time: now });
            Ok(())
        });
        log_rejection("start", caller, res)
    }

    /// Start timestamp; `None` before `start`.
    pub fn start_time(&self) -> Option<Timestamp> {
        self.state.read().start_time
    }

    /// Vested token; `None` before `start`.
    pub fn token(&self) -> Option<Address> {
        self.state.read().token
    }

    /// Fixed allocation (0 before `start`).
    pub fn total_allocation(&self) -> Balance {
        self.state.read().total_allocation
    }

    /// Cumulative vested amount at the current ledger time.
    pub fn vested_amount(&self) -> Result<Balance, VestingError> {
        self.state.read().vested_at(self.now())
    }

    /// Vested but not yet released.
    pub fn releasable(&self) -> Result<Balance, VestingError> {
        let s = self.state.read();
        Ok(s.vested_at(self.now())?.saturating_sub(s.released))
    }

    /// Amount already paid out.
    pub fn released(&self) -> Balance {
        self.state.read().released
    }

    /// Pay everything releasable to the receiver. Callable by anyone.
    pub fn release(&self, caller: Address) -> Result<Balance, VestingError> {
        let _ex = self.exec.lock();
        let res = self.try_release(caller);
        log_rejection("release", caller, res)
    }

    fn try_release(&self, caller: Address) -> Result<Balance, VestingError> {
        let (token, receiver, amount) = {
            let s = self.state.read();
            let amount = s.vested_at(self.now())?.saturating_sub(s.released);
            match s.token {
                Some(token) if amount > 0 => (token, s.receiver, amount),
                _ => return Err(VestingError::NothingToRelease),
            }
        };
        self.ledger.transfer(AssetId::Token(token), self.address, receiver, amount)?;

        let mut s = self.state.write();
        s.released = s.released.checked_add(amount).ok_or(VestingError::Overflow)?;
        let released = s.released;
        drop(s);

        tracing::info!(target: "vesting", %caller, to = %receiver, amount, released, "tokens released");
        let _ = self.events_tx.send(VestingEvent::Released { to: receiver, amount });
        Ok(amount)
    }

    /// Current receiver of releases.
    pub fn receiver(&self) -> Address {
        self.state.read().receiver
    }

    /// Redirect future releases.
    pub fn set_receiver(&self, caller: Address, receiver: Address) -> Result<(), VestingError> {
        let _ex = self.exec.lock();
        let res = self.ensure_owner(caller).and_then(|()| {
            if receiver.is_zero() {
                return Err(VestingError::ZeroAddress);
            }
            self.state.write().receiver = receiver;
            tracing::info!(target: "vesting", %receiver, "receiver updated");
            let _ = self.events_tx.send(VestingEvent::ReceiverUpdated(receiver));
            Ok(())
        });
        log_rejection("set_receiver", caller, res)
    }

    /// Sweep the whole balance of `token` held by the vesting address to `to`.
    /// The vested token stays locked until the schedule completes.
    pub fn emergency_withdraw_token(&self, caller: Address, token: Address, to: Address) -> Result<Balance, VestingError> {
        let _ex = self.exec.lock();
        let res = self.ensure_owner(caller).and_then(|()| {
            let s = self.state.read();
            if s.token == Some(token) {
                let done = s.start_time.map_or(false, |start| schedule::is_complete(start, self.now()));
                if !done {
                    return Err(VestingError::CantWithdrawVestingToken);
                }
            }
            drop(s);
            self.sweep(AssetId::Token(token), to)
        });
        log_rejection("emergency_withdraw_token", caller, res)
    }

    /// Sweep the native coin balance of the vesting address to `to`.
    pub fn emergency_withdraw_eth(&self, caller: Address, to: Address) -> Result<Balance, VestingError> {
        let _ex = self.exec.lock();
        let res = self
            .ensure_owner(caller)
            .and_then(|()| self.sweep(AssetId::Native, to));
        log_rejection("emergency_withdraw_eth", caller, res)
    }

    fn sweep(&self, asset: AssetId, to: Address) -> Result<Balance, VestingError> {
        if to.is_zero() {
            return Err(VestingError::ZeroAddress);
        }
        let amount = self.ledger.balance_of(asset, self.address)?;
        if amount == 0 {
            return Ok(0);
        }
        self.ledger.transfer(asset, self.address, to, amount)?;
        tracing::warn!(target: "vesting", %asset, %to, amount, "emergency withdrawal");
        let _ = self.events_tx.send(VestingEvent::EmergencyWithdrawn { asset, to, amount });
        Ok(amount)
    }

    /// Consistent view of the whole schedule at the current ledger time.
    pub fn snapshot(&self) -> Result<VestingSnapshot, VestingError> {
        let now = self.now();
        let s = self.state.read();
        Ok(VestingSnapshot {
            token: s.token,
            total_allocation: s.total_allocation,
            start_time: s.start_time,
            released: s.released,
            vested: s.vested_at(now)?,
            receiver: s.receiver,
            taken_at: now,
        })
    }
}

fn log_rejection<T>(op: &'static str, caller: Address, res: Result<T, VestingError>) -> Result<T, VestingError> {
    if let Err(e) = &res {
        tracing::debug!(target: "vesting", op, %caller, tag = e.tag(), kind = %e.kind(), "rejected");
    }
    res
}
