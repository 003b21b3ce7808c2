//! # Error Taxonomy
//!
//! Each module owns its own `thiserror` enum ([`crate::pricing::PriceError`],
//! [`crate::nav::NavError`], [`crate::ledger::LedgerError`]). Callers that
//! only care about the *class* of failure (to decide whether a different
//! pool or route is worth trying, say) ask for its [`ErrorKind`] through
//! [`Classify`].
//!
//! Every error is fatal to the operation that raised it. Nothing in this
//! crate retries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad failure classes shared by every module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Zero or malformed identifier or amount supplied to an entry point.
    Validation,
    /// Operation incompatible with the current shutdown status, registration
    /// or queue state.
    State,
    /// The withdrawal queue ran out before the requested amount was met.
    Liquidity,
    /// Token or pool could not be priced.
    Price,
    /// A venue collaborator call failed.
    External,
    /// Checked arithmetic overflowed.
    Arithmetic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::State => write!(f, "state"),
            ErrorKind::Liquidity => write!(f, "liquidity"),
            ErrorKind::Price => write!(f, "price"),
            ErrorKind::External => write!(f, "external"),
            ErrorKind::Arithmetic => write!(f, "arithmetic"),
        }
    }
}

/// Maps a concrete error onto the shared taxonomy.
pub trait Classify {
    /// The failure class of this error.
    fn kind(&self) -> ErrorKind;
}
