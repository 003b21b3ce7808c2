//! Destination records and shutdown status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating status of the vault or of a single destination.
///
/// `Active` is the only state that can be left, and only towards one of the
/// two terminal states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownStatus {
    /// Normal operation.
    #[default]
    Active,
    /// Retired in an orderly fashion.
    Deprecated,
    /// Shut down in response to an exploit.
    Exploit,
}

impl ShutdownStatus {
    /// Returns `true` for [`ShutdownStatus::Active`].
    pub fn is_active(&self) -> bool {
        matches!(self, ShutdownStatus::Active)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: ShutdownStatus) -> bool {
        self.is_active() && !next.is_active()
    }
}

impl fmt::Display for ShutdownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownStatus::Active => write!(f, "active"),
            ShutdownStatus::Deprecated => write!(f, "deprecated"),
            ShutdownStatus::Exploit => write!(f, "exploit"),
        }
    }
}

/// What the vault has deployed to one destination.
///
/// Underlying amounts are in the destination's own token; the value is in
/// the vault's base asset as of the last report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationInfo {
    /// Underlying held directly by the vault.
    pub internal_debt_amount: u128,
    /// Underlying staked with an external rewarder.
    pub external_debt_amount: u128,
    /// Base-asset value of the whole position.
    pub last_reported_value: u128,
    /// Epoch seconds of the last report.
    pub last_report_timestamp: u64,
}

impl DestinationInfo {
    /// Internal plus external underlying. `None` on overflow.
    pub fn underlying(&self) -> Option<u128> {
        self.internal_debt_amount
            .checked_add(self.external_debt_amount)
    }

    /// Nothing left to recover.
    pub fn is_drained(&self) -> bool {
        self.internal_debt_amount == 0
            && self.external_debt_amount == 0
            && self.last_reported_value == 0
    }

    /// Zeroes the amounts, keeping the report timestamp.
    pub fn clear(&mut self) {
        self.internal_debt_amount = 0;
        self.external_debt_amount = 0;
        self.last_reported_value = 0;
    }
}
