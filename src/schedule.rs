//! Team unlock curve: a 12-month cliff followed by a stepped monthly ramp
//! that reaches 100% at month 52.
//!
//! The curve is a table of (month, cumulative bps) breakpoints. Between two
//! breakpoints the cumulative value grows by the same amount every month, so
//! evaluation is an exact integer interpolation over whole elapsed months.

use crate::{
    math::mul_div,
    primitives::{Balance, Timestamp},
};

/// One month: 1/12 of a 365.25-day year.
pub const MONTH_SECONDS: u64 = 2_628_000;

/// Basis points denominator (100% == 10_000 bps).
pub const BPS_DENOM: u32 = 10_000;

/// Elapsed whole months after which the allocation is fully vested.
pub const VESTING_MONTHS: u64 = 52;

/// Cumulative unlock reached at the end of `month`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Breakpoint {
    pub month: u64,
    pub cumulative_bps: u32,
}

const fn bp(month: u64, cumulative_bps: u32) -> Breakpoint {
    Breakpoint { month, cumulative_bps }
}

/// months 13-18: +0.5%/mo, 19-24: +1%, 25-30: +1.5%, 31-36: +3%, 37-52: +4%.
pub const UNLOCK_BREAKPOINTS: [Breakpoint; 7] = [
    bp(0, 0),
    bp(12, 0),
    bp(18, 300),
    bp(24, 900),
    bp(30, 1_800),
    bp(36, 3_600),
    bp(VESTING_MONTHS, BPS_DENOM),
];

/// Whole months elapsed since `start`; zero when `now` precedes it.
#[inline]
pub fn elapsed_months(start: Timestamp, now: Timestamp) -> u64 {
    now.saturating_sub(start) / MONTH_SECONDS
}

/// Cumulative unlocked share after `months` whole months, in bps.
pub fn cumulative_bps(months: u64) -> u32 {
    let table = &UNLOCK_BREAKPOINTS;
    let last = table[table.len() - 1];
    if months >= last.month {
        return last.cumulative_bps;
    }
    for pair in table.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if months < hi.month {
            let span = hi.month - lo.month;
            let rise = u64::from(hi.cumulative_bps - lo.cumulative_bps);
            let step = (months - lo.month) * rise / span;
            return lo.cumulative_bps + step as u32;
        }
    }
    last.cumulative_bps
}

/// floor(total * cumulative_bps / 10_000) at `now` for a schedule started
/// at `start`. Never exceeds `total`.
pub fn vested_at(total: Balance, start: Timestamp, now: Timestamp) -> Option<Balance> {
    let bps = cumulative_bps(elapsed_months(start, now));
    if bps >= BPS_DENOM {
        return Some(total);
    }
    mul_div(total, u128::from(bps), u128::from(BPS_DENOM))
}

/// True once the full schedule has elapsed.
#[inline]
pub fn is_complete(start: Timestamp, now: Timestamp) -> bool {
    elapsed_months(start, now) >= VESTING_MONTHS
}
