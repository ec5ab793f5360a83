//! KERC presale accountant.
//!
//! Accepts deposits in a set of ERC-20 stablecoins with differing decimals,
//! records every participant's contribution in canonical 18-decimal units and
//! forwards the raw tokens to the treasury. The hard cap is global and
//! compared on the canonical basis.
//!
//! Lifecycle: `Pending -> Open -> Closed`. The window is `[start, end)`; the
//! owner can additionally force the sale closed with the `has_ended` flag and
//! reopen it by clearing the flag. A sale whose raised total reached the hard
//! cap accepts no further deposits.
//!
//! Concurrency: state sits behind a `RwLock`; every mutating call is
//! serialized by the engine's execute mutex so validation and commit observe
//! the same counters.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::{
    config::{PresaleSettings, Settings},
    eip712::PermitSignature,
    error::ErrorKind,
    ledger::{Ledger, LedgerError},
    normalize::{self, NormalizeError, CANONICAL_ONE},
    primitives::{Address, AssetId, Balance, Timestamp},
};

// ---------- Events ----------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresaleEvent {
    Participated { participant: Address, token: Address, amount: Balance, normalized: Balance },
    TokensUpdated(Vec<Address>),
    HardCapUpdated(Balance),
    TargetUpdated(Balance),
    TimesUpdated { start: Timestamp, end: Timestamp },
    PresaleHasEnded,
    PresaleReopened,
    Withdrawn { asset: AssetId, to: Address, amount: Balance },
}

// ---------- Errors ----------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresaleError {
    #[error("caller is not the owner")]
    NotOwner,
    #[error("zero address")]
    ZeroAddress,
    #[error("amount must be > 0")]
    ZeroAmount,
    #[error("presale is not open")]
    NotOpen,
    #[error("token {0} is not accepted")]
    NotValidToken(Address),
    #[error("amount too big: {requested} requested, {remaining} left under the hard cap")]
    AmountTooBig { requested: Balance, remaining: Balance },
    #[error("hard cap below total raised")]
    CapBelowRaised,
    #[error("value already carries 18 decimals; pass a whole-token count")]
    UnitMismatch,
    #[error("start time must precede end time")]
    InvalidWindow,
    #[error("has_ended already has that value")]
    HasEndedSame,
    #[error("permit expired")]
    PermitExpired,
    #[error(transparent)]
    Overflow(#[from] NormalizeError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

impl PresaleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PresaleError::NotOwner | PresaleError::PermitExpired => ErrorKind::Authorization,
            PresaleError::ZeroAddress
            | PresaleError::ZeroAmount
            | PresaleError::UnitMismatch
            | PresaleError::InvalidWindow
            | PresaleError::HasEndedSame => ErrorKind::Validation,
            PresaleError::NotOpen => ErrorKind::Window,
            PresaleError::NotValidToken(_) => ErrorKind::Asset,
            PresaleError::AmountTooBig { .. } | PresaleError::CapBelowRaised => ErrorKind::Cap,
            PresaleError::Overflow(e) => e.kind(),
            PresaleError::Ledger(e) => e.kind(),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            PresaleError::NotOwner => "ERR:NOT_OWNER",
            PresaleError::ZeroAddress => "ERR:ZERO_ADDRESS",
            PresaleError::ZeroAmount => "ERR:ZERO_AMOUNT",
            PresaleError::NotOpen => "ERR:NOT_OPEN",
            PresaleError::NotValidToken(_) => "ERR:NOT_VALID_TOKEN",
            PresaleError::AmountTooBig { .. } => "ERR:AMT_TOO_BIG",
            PresaleError::CapBelowRaised => "ERR:CAP_BELOW_RAISED",
            PresaleError::UnitMismatch => "ERR:UNIT_MISMATCH",
            PresaleError::InvalidWindow => "ERR:INVALID_WINDOW",
            PresaleError::HasEndedSame => "ERR:HAS_ENDED_SAME",
            PresaleError::PermitExpired => "ERR:PERMIT_EXPIRED",
            PresaleError::Overflow(e) => e.tag(),
            PresaleError::Ledger(e) => e.tag(),
        }
    }
}

// ---------- State ----------

/// Observable phase of the sale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaleStatus {
    Pending,
    Open,
    Closed,
}

#[derive(Clone, Debug, Default)]
struct SaleState {
    tokens: Vec<Address>,
    decimals: HashMap<Address, u8>,
    target_amt: Balance,
    hard_cap_amt: Balance,
    start_time: Timestamp,
    end_time: Timestamp,
    has_ended: bool,
    balances: HashMap<Address, Balance>,
    participants: u64,
    total_raised: Balance,
}

impl SaleState {
    fn open_at(&self, now: Timestamp) -> bool {
        !self.has_ended && now >= self.start_time && now < self.end_time
    }

    fn filled(&self) -> bool {
        self.hard_cap_amt > 0 && self.total_raised >= self.hard_cap_amt
    }
}

// ---------- Engine ----------

pub struct Presale<L: Ledger> {
    ledger: Arc<L>,
    address: Address,
    owner: Address,
    treasury: Address,
    exec: Mutex<()>,
    state: RwLock<SaleState>,
    events_tx: broadcast::Sender<PresaleEvent>,
}

impl<L: Ledger> fmt::Debug for Presale<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.state.read();
        f.debug_struct("Presale")
            .field("address", &self.address)
            .field("treasury", &self.treasury)
            .field("total_raised", &s.total_raised)
            .field("participants", &s.participants)
            .finish()
    }
}

impl<L: Ledger> Presale<L> {
    /// Deploy a sale at `settings.address`. Accepted tokens must report their
    /// decimals through the ledger; caps are whole-token counts.
    pub fn new(ledger: Arc<L>, settings: &PresaleSettings) -> Result<Arc<Self>, PresaleError> {
        if settings.address.is_zero() || settings.owner.is_zero() || settings.treasury.is_zero() {
            return Err(PresaleError::ZeroAddress);
        }
        let (tokens, decimals) = fetch_decimals(ledger.as_ref(), &settings.tokens)?;
        let state = SaleState {
            tokens,
            decimals,
            target_amt: scale_whole(u128::from(settings.target_amount))?,
            hard_cap_amt: scale_whole(u128::from(settings.hard_cap_amount))?,
            start_time: settings.start_time.unwrap_or(0),
            end_time: settings.end_time.unwrap_or(0),
            ..SaleState::default()
        };
        if settings.start_time.is_some() && settings.end_time.is_some() && state.start_time >= state.end_time {
            return Err(PresaleError::InvalidWindow);
        }

        let (tx, _) = broadcast::channel(settings.event_capacity.max(1));
        tracing::info!(
            target: "presale",
            address = %settings.address,
            treasury = %settings.treasury,
            tokens = state.tokens.len(),
            hard_cap = state.hard_cap_amt,
            "presale deployed"
        );
        Ok(Arc::new(Self {
            ledger,
            address: settings.address,
            owner: settings.owner,
            treasury: settings.treasury,
            exec: Mutex::new(()),
            state: RwLock::new(state),
            events_tx: tx,
        }))
    }

    pub fn from_settings(ledger: Arc<L>, settings: &Settings) -> Result<Arc<Self>, PresaleError> {
        Self::new(ledger, &settings.presale)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresaleEvent> {
        self.events_tx.subscribe()
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn treasury(&self) -> Address {
        self.treasury
    }

    fn now(&self) -> Timestamp {
        self.ledger.now_unix()
    }

    fn ensure_owner(&self, caller: Address) -> Result<(), PresaleError> {
        if caller != self.owner {
            return Err(PresaleError::NotOwner);
        }
        Ok(())
    }

    // ---------- Deposits ----------

    /// Deposit `amount` native units of `token`, pulled from `caller` through
    /// the allowance granted to the sale address. Returns the credited
    /// canonical amount.
    pub fn participate(&self, caller: Address, token: Address, amount: Balance) -> Result<Balance, PresaleError> {
        let _ex = self.exec.lock();
        let res = self
            .validate_deposit(token, amount)
            .and_then(|normalized| self.settle(caller, token, amount, normalized));
        log_rejection("participate", caller, res)
    }

    /// Deposit authorized by a signed EIP-2612 permit instead of a prior
    /// approval. The permit must name the sale address as spender and
    /// `amount` as value.
    #[allow(clippy::too_many_arguments)]
    pub fn participate_with_permit(
        &self,
        caller: Address,
        token: Address,
        amount: Balance,
        deadline: Timestamp,
        v: u8,
        r: [u8; 32],
        s: [u8; 32],
    ) -> Result<Balance, PresaleError> {
        let _ex = self.exec.lock();
        let res = self.validate_deposit(token, amount).and_then(|normalized| {
            if self.now() > deadline {
                return Err(PresaleError::PermitExpired);
            }
            // fail before the permit spends the nonce
            if self.ledger.balance_of(AssetId::Token(token), caller)? < amount {
                return Err(PresaleError::Ledger(LedgerError::Insufficient));
            }
            let signature = PermitSignature { v, r, s };
            self.ledger
                .permit(token, caller, self.address, amount, deadline, &signature)?;
            self.settle(caller, token, amount, normalized)
        });
        log_rejection("participate_with_permit", caller, res)
    }

    /// All checks that precede moving funds. Returns the canonical amount.
    fn validate_deposit(&self, token: Address, amount: Balance) -> Result<Balance, PresaleError> {
        if amount == 0 {
            return Err(PresaleError::ZeroAmount);
        }
        let now = self.now();
        let s = self.state.read();
        if !s.open_at(now) || s.filled() {
            return Err(PresaleError::NotOpen);
        }
        let decimals = *s.decimals.get(&token).ok_or(PresaleError::NotValidToken(token))?;
        let normalized = normalize::to_canonical(amount, decimals)?;
        // dust that floors to zero canonical units
        if normalized == 0 {
            return Err(PresaleError::ZeroAmount);
        }

        let remaining = s.hard_cap_amt.saturating_sub(s.total_raised);
        if normalized > remaining {
            return Err(PresaleError::AmountTooBig { requested: normalized, remaining });
        }
        Ok(normalized)
    }

    /// Pull the tokens into the treasury, then commit the bookkeeping.
    fn settle(
        &self,
        caller: Address,
        token: Address,
        amount: Balance,
        normalized: Balance,
    ) -> Result<Balance, PresaleError> {
        self.ledger
            .transfer_from(token, self.address, caller, self.treasury, amount)?;

        let mut s = self.state.write();
        let raised = s.total_raised.checked_add(normalized).ok_or(NormalizeError::Overflow)?;
        let first = !s.balances.contains_key(&caller);
        let prior = s.balances.get(&caller).copied().unwrap_or(0);
        let credited = prior.checked_add(normalized).ok_or(NormalizeError::Overflow)?;
        if first {
            s.participants += 1;
        }
        s.balances.insert(caller, credited);
        s.total_raised = raised;
        drop(s);

        tracing::info!(
            target: "presale",
            participant = %caller,
            %token,
            amount,
            normalized,
            total_raised = raised,
            "deposit recorded"
        );
        let _ = self.events_tx.send(PresaleEvent::Participated {
            participant: caller,
            token,
            amount,
            normalized,
        });
        Ok(normalized)
    }

    // ---------- Accepted tokens ----------

    pub fn get_tokens(&self) -> Vec<Address> {
        self.state.read().tokens.clone()
    }

    /// Decimals recorded for `token`; 0 when it is not accepted.
    pub fn token_decimals(&self, token: Address) -> u8 {
        self.state.read().decimals.get(&token).copied().unwrap_or(0)
    }

    /// Replace the accepted set. Nothing changes unless every entry reports
    /// its decimals.
    pub fn set_tokens(&self, caller: Address, tokens: &[Address]) -> Result<(), PresaleError> {
        let _ex = self.exec.lock();
        let res = self.ensure_owner(caller).and_then(|()| {
            let (list, decimals) = fetch_decimals(self.ledger.as_ref(), tokens)?;
            let mut s = self.state.write();
            s.tokens = list.clone();
            s.decimals = decimals;
            drop(s);
            tracing::info!(target: "presale", tokens = ?list, "accepted tokens replaced");
            let _ = self.events_tx.send(PresaleEvent::TokensUpdated(list));
            Ok(())
        });
        log_rejection("set_tokens", caller, res)
    }

    // ---------- Caps ----------

    pub fn hard_cap_amt(&self) -> Balance {
        self.state.read().hard_cap_amt
    }

    /// Set the hard cap to `whole` canonical tokens.
    pub fn set_hard_cap_amt(&self, caller: Address, whole: Balance) -> Result<(), PresaleError> {
        let _ex = self.exec.lock();
        let res = self.ensure_owner(caller).and_then(|()| {
            let cap = scale_whole(whole)?;
            let mut s = self.state.write();
            if cap < s.total_raised {
                return Err(PresaleError::CapBelowRaised);
            }
            s.hard_cap_amt = cap;
            drop(s);
            tracing::info!(target: "presale", hard_cap = cap, "hard cap updated");
            let _ = self.events_tx.send(PresaleEvent::HardCapUpdated(cap));
            Ok(())
        });
        log_rejection("set_hard_cap_amt", caller, res)
    }

    pub fn target_amt(&self) -> Balance {
        self.state.read().target_amt
    }

    /// Set the informational target to `whole` canonical tokens.
    pub fn set_target_amt(&self, caller: Address, whole: Balance) -> Result<(), PresaleError> {
        let _ex = self.exec.lock();
        let res = self.ensure_owner(caller).and_then(|()| {
            let target = scale_whole(whole)?;
            self.state.write().target_amt = target;
            tracing::info!(target: "presale", target_amt = target, "target updated");
            let _ = self.events_tx.send(PresaleEvent::TargetUpdated(target));
            Ok(())
        });
        log_rejection("set_target_amt", caller, res)
    }

    // ---------- Window ----------

    pub fn start_time(&self) -> Timestamp {
        self.state.read().start_time
    }

    pub fn end_time(&self) -> Timestamp {
        self.state.read().end_time
    }

    pub fn set_times(&self, caller: Address, start: Timestamp, end: Timestamp) -> Result<(), PresaleError> {
        let _ex = self.exec.lock();
        let res = self.ensure_owner(caller).and_then(|()| {
            if start >= end {
                return Err(PresaleError::InvalidWindow);
            }
            self.update_window(|s| {
                s.start_time = start;
                s.end_time = end;
            });
            Ok(())
        });
        log_rejection("set_times", caller, res)
    }

    pub fn set_start_time(&self, caller: Address, start: Timestamp) -> Result<(), PresaleError> {
        let _ex = self.exec.lock();
        let res = self
            .ensure_owner(caller)
            .map(|()| self.update_window(|s| s.start_time = start));
        log_rejection("set_start_time", caller, res)
    }

    /// Move the end of the window; extending a lapsed window reopens it.
    pub fn set_end_time(&self, caller: Address, end: Timestamp) -> Result<(), PresaleError> {
        let _ex = self.exec.lock();
        let res = self
            .ensure_owner(caller)
            .map(|()| self.update_window(|s| s.end_time = end));
        log_rejection("set_end_time", caller, res)
    }

    fn update_window(&self, f: impl FnOnce(&mut SaleState)) {
        let mut s = self.state.write();
        f(&mut s);
        let (start, end) = (s.start_time, s.end_time);
        drop(s);
        tracing::info!(target: "presale", start, end, "sale window updated");
        let _ = self.events_tx.send(PresaleEvent::TimesUpdated { start, end });
    }

    pub fn has_ended(&self) -> bool {
        self.state.read().has_ended
    }

    /// Force the sale closed (`true`) or lift the override (`false`).
    pub fn set_has_ended(&self, caller: Address, ended: bool) -> Result<(), PresaleError> {
        let _ex = self.exec.lock();
        let res = self.ensure_owner(caller).and_then(|()| {
            let mut s = self.state.write();
            if s.has_ended == ended {
                return Err(PresaleError::HasEndedSame);
            }
            s.has_ended = ended;
            drop(s);
            let event = if ended {
                PresaleEvent::PresaleHasEnded
            } else {
                PresaleEvent::PresaleReopened
            };
            tracing::info!(target: "presale", ended, "manual close override changed");
            let _ = self.events_tx.send(event);
            Ok(())
        });
        log_rejection("set_has_ended", caller, res)
    }

    pub fn set_closed(&self, caller: Address, closed: bool) -> Result<(), PresaleError> {
        self.set_has_ended(caller, closed)
    }

    /// True iff now is inside `[start, end)` and the sale was not force-closed.
    pub fn open(&self) -> bool {
        self.state.read().open_at(self.now())
    }

    /// True once the raised total has reached the hard cap.
    pub fn is_filled(&self) -> bool {
        self.state.read().filled()
    }

    pub fn status(&self) -> SaleStatus {
        let now = self.now();
        let s = self.state.read();
        if s.open_at(now) {
            SaleStatus::Open
        } else if !s.has_ended && now < s.start_time {
            SaleStatus::Pending
        } else {
            SaleStatus::Closed
        }
    }

    // ---------- Ledger queries ----------

    pub fn number_of_participants(&self) -> u64 {
        self.state.read().participants
    }

    /// Canonical (18-decimal) amount deposited by `who`.
    pub fn balance_of(&self, who: Address) -> Balance {
        self.state.read().balances.get(&who).copied().unwrap_or(0)
    }

    pub fn total_raised(&self) -> Balance {
        self.state.read().total_raised
    }

    // ---------- Sweeps ----------

    /// Send the sale address's whole balance of `token` to the treasury.
    pub fn withdraw(&self, caller: Address, token: Address) -> Result<Balance, PresaleError> {
        self.sweep(caller, AssetId::Token(token))
    }

    /// Send the sale address's native coin balance to the treasury.
    pub fn withdraw_eth(&self, caller: Address) -> Result<Balance, PresaleError> {
        self.sweep(caller, AssetId::Native)
    }

    fn sweep(&self, caller: Address, asset: AssetId) -> Result<Balance, PresaleError> {
        let _ex = self.exec.lock();
        let res = self.ensure_owner(caller).and_then(|()| {
            let amount = self.ledger.balance_of(asset, self.address)?;
            if amount == 0 {
                return Ok(0);
            }
            self.ledger.transfer(asset, self.address, self.treasury, amount)?;
            tracing::warn!(target: "presale", %asset, to = %self.treasury, amount, "funds swept");
            let _ = self.events_tx.send(PresaleEvent::Withdrawn { asset, to: self.treasury, amount });
            Ok(amount)
        });
        log_rejection("withdraw", caller, res)
    }
}

/// `whole * 10^18`, refusing values that are already scaled.
fn scale_whole(whole: Balance) -> Result<Balance, PresaleError> {
    if whole >= CANONICAL_ONE {
        return Err(PresaleError::UnitMismatch);
    }
    Ok(normalize::whole_to_canonical(whole)?)
}

/// Dedup `tokens` (first occurrence wins) and look up every decimals value.
fn fetch_decimals<L: Ledger>(
    ledger: &L,
    tokens: &[Address],
) -> Result<(Vec<Address>, HashMap<Address, u8>), PresaleError> {
    let mut list = Vec::with_capacity(tokens.len());
    let mut decimals = HashMap::with_capacity(tokens.len());
    for &token in tokens {
        if token.is_zero() {
            return Err(PresaleError::ZeroAddress);
        }
        if decimals.contains_key(&token) {
            continue;
        }
        decimals.insert(token, ledger.decimals(token)?);
        list.push(token);
    }
    Ok((list, decimals))
}

fn log_rejection<T>(op: &'static str, caller: Address, res: Result<T, PresaleError>) -> Result<T, PresaleError> {
    if let Err(e) = &res {
        tracing::debug!(target: "presale", op, %caller, tag = e.tag(), kind = %e.kind(), "rejected");
    }
    res
}

// ---------- Tests ----------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        eip712::{address_of, sign_permit, Permit},
        memory::MemoryLedger,
    };
    use k256::ecdsa::SigningKey;

    const NOW: Timestamp = 1_700_000_000;
    const HOUR: u64 = 3_600;
    const USD: Balance = 1_000_000;

    fn addr(x: u64) -> Address {
        Address::from_low_u64(x)
    }

    fn wei(n: Balance) -> Balance {
        n * CANONICAL_ONE
    }

    fn usd(n: Balance) -> Balance {
        n * USD
    }

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        sale: Arc<Presale<MemoryLedger>>,
        owner: Address,
        treasury: Address,
        usdc: Address,
        busd: Address,
        a1: Address,
        a2: Address,
    }

    impl Fixture {
        fn open_window(&self) {
            self.sale.set_times(self.owner, NOW - HOUR, NOW + 24 * HOUR).unwrap();
        }

        fn approve(&self, token: Address, who: Address, amount: Balance) {
            self.ledger.approve(token, who, self.sale.address(), amount).unwrap();
        }
    }

    fn deploy() -> Fixture {
        let ledger = Arc::new(MemoryLedger::new(31_337, NOW));
        let usdc = ledger.deploy_token("USD Coin", "USDC", 6);
        let busd = ledger.deploy_token("Binance USD", "BUSD", 18);
        let (owner, treasury, a1, a2) = (addr(1), addr(2), addr(0x10), addr(0x11));

        let settings = PresaleSettings {
            address: addr(0xa0),
            owner,
            treasury,
            tokens: vec![usdc, busd],
            target_amount: 2_500_000,
            hard_cap_amount: 3_500_000,
            ..PresaleSettings::default()
        };
        let sale = Presale::new(ledger.clone(), &settings).unwrap();

        ledger.mint(usdc, a1, usd(10_000_000)).unwrap();
        ledger.mint(usdc, a2, usd(10_000_000)).unwrap();
        ledger.mint(busd, a1, wei(1_000_000)).unwrap();
        Fixture { ledger, sale, owner, treasury, usdc, busd, a1, a2 }
    }

    #[test]
    fn reports_accepted_tokens() {
        let f = deploy();
        assert_eq!(f.sale.get_tokens(), vec![f.usdc, f.busd]);
        assert_eq!(f.sale.token_decimals(f.usdc), 6);
        assert_eq!(f.sale.token_decimals(f.busd), 18);
        assert_eq!(f.sale.token_decimals(addr(0xdead)), 0);
    }

    #[test]
    fn replaces_accepted_tokens() {
        let f = deploy();
        let frax = f.ledger.deploy_token("Frax", "FRAX", 18);

        f.sale.set_tokens(f.owner, &[frax, frax]).unwrap();
        assert_eq!(f.sale.get_tokens(), vec![frax]);
        assert_eq!(f.sale.token_decimals(frax), 18);
        assert_eq!(f.sale.token_decimals(f.usdc), 0);
        assert_eq!(f.sale.token_decimals(f.busd), 0);

        // unknown token: nothing changes
        let res = f.sale.set_tokens(f.owner, &[f.usdc, addr(0xbad)]);
        assert!(matches!(res, Err(PresaleError::Ledger(LedgerError::UnknownToken(_)))));
        assert_eq!(f.sale.get_tokens(), vec![frax]);

        assert!(matches!(f.sale.set_tokens(f.a1, &[f.usdc]), Err(PresaleError::NotOwner)));
    }

    #[test]
    fn replacing_tokens_keeps_recorded_deposits() {
        let f = deploy();
        f.open_window();
        f.approve(f.usdc, f.a1, usd(1_500));
        f.sale.participate(f.a1, f.usdc, usd(1_500)).unwrap();

        let frax = f.ledger.deploy_token("Frax", "FRAX", 18);
        f.sale.set_tokens(f.owner, &[frax]).unwrap();

        assert_eq!(f.sale.balance_of(f.a1), wei(1_500));
        assert_eq!(f.sale.total_raised(), wei(1_500));
        assert_eq!(f.sale.number_of_participants(), 1);

        // dropped token no longer accepted
        f.approve(f.usdc, f.a1, usd(10));
        assert_eq!(f.sale.participate(f.a1, f.usdc, usd(10)), Err(PresaleError::NotValidToken(f.usdc)));
        assert_eq!(f.sale.balance_of(f.a1), wei(1_500));
    }

    #[test]
    fn updates_hard_cap() {
        let f = deploy();
        assert_eq!(f.sale.hard_cap_amt(), wei(3_500_000));
        f.sale.set_hard_cap_amt(f.owner, 4_000_000).unwrap();
        assert_eq!(f.sale.hard_cap_amt(), wei(4_000_000));

        f.open_window();
        f.approve(f.usdc, f.a1, usd(4_000_000));
        f.sale.participate(f.a1, f.usdc, usd(4_000_000)).unwrap();
        assert_eq!(f.sale.balance_of(f.a1), wei(4_000_000));

        assert_eq!(f.sale.set_hard_cap_amt(f.owner, 3_000_000), Err(PresaleError::CapBelowRaised));
        f.sale.set_hard_cap_amt(f.owner, 4_100_000).unwrap();
        assert_eq!(f.sale.set_hard_cap_amt(f.owner, wei(5_000_000)), Err(PresaleError::UnitMismatch));
        assert_eq!(f.sale.hard_cap_amt(), wei(4_100_000));
    }

    #[test]
    fn updates_target() {
        let f = deploy();
        assert_eq!(f.sale.target_amt(), wei(2_500_000));
        f.sale.set_target_amt(f.owner, 3_000_000).unwrap();
        assert_eq!(f.sale.target_amt(), wei(3_000_000));
        assert_eq!(f.sale.set_target_amt(f.owner, wei(3_000_000)), Err(PresaleError::UnitMismatch));
        assert_eq!(f.sale.set_target_amt(f.a1, 1), Err(PresaleError::NotOwner));
    }

    #[test]
    fn toggles_has_ended() {
        let f = deploy();
        let mut rx = f.sale.subscribe();
        assert!(!f.sale.has_ended());

        f.sale.set_has_ended(f.owner, true).unwrap();
        assert_eq!(rx.try_recv().unwrap(), PresaleEvent::PresaleHasEnded);
        f.sale.set_closed(f.owner, false).unwrap();
        assert_eq!(rx.try_recv().unwrap(), PresaleEvent::PresaleReopened);

        let err = f.sale.set_has_ended(f.owner, false).unwrap_err();
        assert_eq!(err.tag(), "ERR:HAS_ENDED_SAME");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn reports_open_status() {
        let f = deploy();
        assert!(!f.sale.open());
        assert_eq!(f.sale.status(), SaleStatus::Closed);

        f.open_window();
        assert!(f.sale.open());
        f.ledger.set_now(NOW + 12 * HOUR);
        assert!(f.sale.open());
        f.ledger.set_now(NOW + 25 * HOUR);
        assert!(!f.sale.open());

        f.sale.set_end_time(f.owner, NOW + 36 * HOUR).unwrap();
        assert!(f.sale.open());
        f.ledger.set_now(NOW + 37 * HOUR);
        assert!(!f.sale.open());

        f.sale.set_times(f.owner, NOW + 40 * HOUR, NOW + 50 * HOUR).unwrap();
        assert_eq!(f.sale.status(), SaleStatus::Pending);
        assert_eq!(f.sale.set_times(f.owner, 10, 10), Err(PresaleError::InvalidWindow));
    }

    #[test]
    fn override_round_trips_open() {
        let f = deploy();
        f.open_window();
        assert!(f.sale.open());
        f.sale.set_has_ended(f.owner, true).unwrap();
        assert!(!f.sale.open());
        assert_eq!(f.sale.status(), SaleStatus::Closed);
        f.approve(f.usdc, f.a1, usd(1));
        assert_eq!(f.sale.participate(f.a1, f.usdc, usd(1)), Err(PresaleError::NotOpen));
        f.sale.set_has_ended(f.owner, false).unwrap();
        assert!(f.sale.open());
        assert_eq!(f.sale.status(), SaleStatus::Open);
    }

    #[test]
    fn deposits_with_permit() {
        let f = deploy();
        f.open_window();
        let sk = SigningKey::from_slice(&[11u8; 32]).unwrap();
        let holder = address_of(sk.verifying_key());
        f.ledger.mint(f.usdc, holder, usd(5_000)).unwrap();

        let amt = usd(1_000);
        let deadline = NOW + 12 * HOUR + 600;
        let permit = Permit { owner: holder, spender: f.sale.address(), value: amt, nonce: 0, deadline };
        let sig = sign_permit(&sk, &f.ledger.permit_domain(f.usdc).unwrap(), &permit).unwrap();

        f.sale
            .participate_with_permit(holder, f.usdc, amt, deadline, sig.v, sig.r, sig.s)
            .unwrap();

        // replay: nonce already consumed
        let replay = f.sale.participate_with_permit(holder, f.usdc, amt, deadline, sig.v, sig.r, sig.s);
        assert!(matches!(replay, Err(PresaleError::Ledger(LedgerError::InvalidSigner))));
        assert_eq!(replay.unwrap_err().kind(), ErrorKind::Authorization);

        assert_eq!(f.sale.balance_of(holder), wei(1_000));
        assert_eq!(f.ledger.balance_of(AssetId::Token(f.usdc), f.treasury).unwrap(), amt);
    }

    #[test]
    fn expired_permit_is_rejected() {
        let f = deploy();
        f.open_window();
        let sk = SigningKey::from_slice(&[12u8; 32]).unwrap();
        let holder = address_of(sk.verifying_key());
        f.ledger.mint(f.usdc, holder, usd(10)).unwrap();

        let deadline = NOW + 60;
        let permit = Permit { owner: holder, spender: f.sale.address(), value: usd(10), nonce: 0, deadline };
        let sig = sign_permit(&sk, &f.ledger.permit_domain(f.usdc).unwrap(), &permit).unwrap();

        f.ledger.set_now(deadline + 1);
        let res = f.sale.participate_with_permit(holder, f.usdc, usd(10), deadline, sig.v, sig.r, sig.s);
        assert_eq!(res, Err(PresaleError::PermitExpired));
        assert_eq!(f.ledger.nonces(f.usdc, holder).unwrap(), 0);
        assert_eq!(f.sale.balance_of(holder), 0);
    }

    #[test]
    fn unfunded_permit_keeps_nonce_and_allowance() {
        let f = deploy();
        f.open_window();
        let sk = SigningKey::from_slice(&[13u8; 32]).unwrap();
        let holder = address_of(sk.verifying_key());

        let amt = usd(250);
        let deadline = NOW + HOUR;
        let permit = Permit { owner: holder, spender: f.sale.address(), value: amt, nonce: 0, deadline };
        let sig = sign_permit(&sk, &f.ledger.permit_domain(f.usdc).unwrap(), &permit).unwrap();

        let res = f.sale.participate_with_permit(holder, f.usdc, amt, deadline, sig.v, sig.r, sig.s);
        assert_eq!(res, Err(PresaleError::Ledger(LedgerError::Insufficient)));
        assert_eq!(f.ledger.nonces(f.usdc, holder).unwrap(), 0);
        assert_eq!(f.ledger.allowance(f.usdc, holder, f.sale.address()).unwrap(), 0);
        assert_eq!(f.sale.balance_of(holder), 0);
        assert_eq!(f.sale.number_of_participants(), 0);

        // once funded, the same signature still goes through
        f.ledger.mint(f.usdc, holder, amt).unwrap();
        f.sale
            .participate_with_permit(holder, f.usdc, amt, deadline, sig.v, sig.r, sig.s)
            .unwrap();
        assert_eq!(f.sale.balance_of(holder), wei(250));
    }

    #[test]
    fn handles_multiple_deposits() {
        let f = deploy();
        f.open_window();
        f.approve(f.usdc, f.a1, usd(2_000));
        f.approve(f.usdc, f.a2, usd(1_000));

        f.sale.participate(f.a1, f.usdc, usd(1_000)).unwrap();
        assert_eq!(f.sale.balance_of(f.a1), wei(1_000));
        f.sale.participate(f.a1, f.usdc, usd(1_000)).unwrap();
        assert_eq!(f.sale.balance_of(f.a1), wei(2_000));
        f.sale.participate(f.a2, f.usdc, usd(1_000)).unwrap();
        assert_eq!(f.sale.balance_of(f.a2), wei(1_000));

        assert_eq!(f.ledger.balance_of(AssetId::Token(f.usdc), f.treasury).unwrap(), usd(3_000));
        assert_eq!(f.sale.number_of_participants(), 2);
        assert_eq!(f.sale.total_raised(), wei(3_000));
    }

    #[test]
    fn rejects_deposits_over_hard_cap() {
        let f = deploy();
        f.open_window();
        f.approve(f.usdc, f.a1, usd(10_000_000));

        let err = f.sale.participate(f.a1, f.usdc, usd(4_000_000)).unwrap_err();
        assert_eq!(err.tag(), "ERR:AMT_TOO_BIG");
        assert_eq!(f.sale.total_raised(), 0);
        assert_eq!(f.sale.balance_of(f.a1), 0);

        f.sale.participate(f.a1, f.usdc, usd(3_400_000)).unwrap();
        assert!(matches!(
            f.sale.participate(f.a1, f.usdc, usd(200_000)),
            Err(PresaleError::AmountTooBig { .. })
        ));
        assert_eq!(f.sale.balance_of(f.a1), wei(3_400_000));

        // lands exactly on the cap
        f.sale.participate(f.a1, f.usdc, usd(100_000)).unwrap();
        assert!(f.sale.is_filled());
        assert_eq!(f.sale.participate(f.a1, f.usdc, 1).unwrap_err().tag(), "ERR:NOT_OPEN");
    }

    #[test]
    fn mixes_decimals() {
        let f = deploy();
        f.open_window();
        f.approve(f.usdc, f.a1, usd(1_000));
        f.approve(f.busd, f.a1, wei(1_000));

        let a = f.sale.participate(f.a1, f.usdc, usd(1_000)).unwrap();
        let b = f.sale.participate(f.a1, f.busd, wei(1_000)).unwrap();
        assert_eq!(a, b);
        assert_eq!(f.sale.balance_of(f.a1), wei(2_000));
        assert_eq!(f.sale.number_of_participants(), 1);
    }

    #[test]
    fn rejects_unsupported_tokens_and_zero_amounts() {
        let f = deploy();
        f.open_window();
        let usdm = f.ledger.deploy_token("Moo Coin", "USDM", 6);
        f.ledger.mint(usdm, f.a1, usd(1_000)).unwrap();
        f.approve(usdm, f.a1, usd(1_000));

        let err = f.sale.participate(f.a1, usdm, usd(1_000)).unwrap_err();
        assert_eq!(err.tag(), "ERR:NOT_VALID_TOKEN");
        assert_eq!(err.kind(), ErrorKind::Asset);
        assert_eq!(f.sale.participate(f.a1, f.usdc, 0), Err(PresaleError::ZeroAmount));
    }

    #[test]
    fn dust_below_one_canonical_unit_is_rejected() {
        let f = deploy();
        f.open_window();
        let wide = f.ledger.deploy_token("Wide Dollar", "WUSD", 20);
        f.sale.set_tokens(f.owner, &[f.usdc, wide]).unwrap();
        f.ledger.mint(wide, f.a1, 1_000).unwrap();
        f.approve(wide, f.a1, 1_000);

        // 99 raw units at 20 decimals floor to zero
        assert_eq!(f.sale.participate(f.a1, wide, 99), Err(PresaleError::ZeroAmount));
        assert_eq!(f.ledger.balance_of(AssetId::Token(wide), f.treasury).unwrap(), 0);
        assert_eq!(f.sale.number_of_participants(), 0);

        f.sale.participate(f.a1, wide, 100).unwrap();
        f.sale.participate(f.a1, wide, 100).unwrap();
        assert_eq!(f.sale.balance_of(f.a1), 2);
        assert_eq!(f.sale.number_of_participants(), 1);
    }

    #[test]
    fn failed_transfer_leaves_no_partial_state() {
        let f = deploy();
        f.open_window();
        // no allowance granted
        let res = f.sale.participate(f.a1, f.usdc, usd(10));
        assert!(matches!(res, Err(PresaleError::Ledger(LedgerError::InsufficientAllowance))));
        assert_eq!(f.sale.balance_of(f.a1), 0);
        assert_eq!(f.sale.number_of_participants(), 0);
        assert_eq!(f.sale.total_raised(), 0);
    }

    #[test]
    fn emits_participation_events() {
        let f = deploy();
        f.open_window();
        let mut rx = f.sale.subscribe();
        f.approve(f.usdc, f.a1, usd(5));
        f.sale.participate(f.a1, f.usdc, usd(5)).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            PresaleEvent::Participated { participant: f.a1, token: f.usdc, amount: usd(5), normalized: wei(5) }
        );
    }

    #[test]
    fn withdraws_stray_tokens() {
        let f = deploy();
        f.ledger
            .transfer(AssetId::Token(f.usdc), f.a1, f.sale.address(), usd(500))
            .unwrap();
        assert_eq!(f.ledger.balance_of(AssetId::Token(f.usdc), f.treasury).unwrap(), 0);

        assert_eq!(f.sale.withdraw(f.a1, f.usdc), Err(PresaleError::NotOwner));
        assert_eq!(f.sale.withdraw(f.owner, f.usdc).unwrap(), usd(500));
        assert_eq!(f.ledger.balance_of(AssetId::Token(f.usdc), f.treasury).unwrap(), usd(500));
        // nothing left
        assert_eq!(f.sale.withdraw(f.owner, f.usdc).unwrap(), 0);
    }

    #[test]
    fn withdraws_native_coin() {
        let f = deploy();
        f.ledger.fund_native(f.treasury, wei(3)).unwrap();
        f.ledger.fund_native(f.sale.address(), wei(100)).unwrap();

        assert_eq!(f.sale.withdraw_eth(f.owner).unwrap(), wei(100));
        assert_eq!(f.ledger.balance_of(AssetId::Native, f.treasury).unwrap(), wei(103));
        assert_eq!(f.ledger.balance_of(AssetId::Native, f.sale.address()).unwrap(), 0);
    }

    #[test]
    fn rejects_zero_treasury() {
        let ledger = Arc::new(MemoryLedger::new(1, NOW));
        let settings = PresaleSettings { address: addr(0xa0), owner: addr(1), ..PresaleSettings::default() };
        assert!(matches!(Presale::new(ledger, &settings), Err(PresaleError::ZeroAddress)));
    }
}
