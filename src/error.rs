//! Error taxonomy shared by every component.
//!
//! Each component has its own `thiserror` enum; all of them map onto one
//! [`ErrorKind`] and expose a stable reason tag so hosts can surface a
//! distinct code per rejection.

use std::fmt;

/// Category of a rejection. All rejections are synchronous and non-retryable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad parameters: zero address, redundant toggle, unit mismatch.
    Validation,
    /// Deposit attempted outside the open window.
    Window,
    /// Would exceed, or undercut, the hard cap.
    Cap,
    /// Asset not in the accepted set.
    Asset,
    /// Permit expired or invalid, nonce replay, caller not privileged.
    Authorization,
    /// Lifecycle violation: already started, nothing to release.
    State,
    /// Checked arithmetic failed.
    Arithmetic,
    /// The external ledger rejected the call.
    Ledger,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Window => "window",
            ErrorKind::Cap => "cap",
            ErrorKind::Asset => "asset",
            ErrorKind::Authorization => "authorization",
            ErrorKind::State => "state",
            ErrorKind::Arithmetic => "arithmetic",
            ErrorKind::Ledger => "ledger",
        };
        f.write_str(s)
    }
}
