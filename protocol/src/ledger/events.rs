//! Vault events.
//!
//! Every state-changing ledger operation appends to an in-memory log. The
//! owner drains it with [`super::DebtLedger::drain_events`] and forwards the
//! entries wherever it publishes them.

use serde::{Deserialize, Serialize};

use super::destination::ShutdownStatus;
use crate::address::Address;

/// Result of a single destination debt report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtReported {
    /// Reporting destination.
    pub destination: Address,
    /// Base-asset value now on the books.
    pub new_value: u128,
    /// Base asset observed arriving from the reward claim.
    pub amount_claimed: u128,
    /// Gas reported by the venue for the claim.
    pub gas_used: u64,
}

/// Snapshot produced when a reporting round is finalized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavReport {
    /// Idle base asset.
    pub idle: u128,
    /// Sum of destination values.
    pub debt: u128,
    /// Outstanding shares.
    pub total_supply: u128,
    /// Total assets per share, WAD-scaled.
    pub nav_per_share: u128,
    /// Epoch seconds the round was finalized at.
    pub timestamp: u64,
}

/// Entries of the vault event log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultEvent {
    /// A destination reported its debt.
    DebtReported(DebtReported),

    /// A reporting round was finalized.
    Nav {
        /// Idle base asset.
        idle: u128,
        /// Sum of destination values.
        debt: u128,
        /// Outstanding shares.
        total_supply: u128,
    },

    /// The vault left the active state.
    Shutdown {
        /// Terminal status entered.
        reason: ShutdownStatus,
    },

    /// A destination was registered.
    DestinationAdded {
        /// The destination.
        destination: Address,
    },

    /// A destination was deregistered and dropped from every queue.
    DestinationRemoved {
        /// The destination.
        destination: Address,
    },

    /// A destination still holding funds was flagged for removal.
    DestinationQueuedForRemoval {
        /// The destination.
        destination: Address,
    },

    /// A single destination left the active state.
    DestinationShutdown {
        /// The destination.
        destination: Address,
        /// Terminal status entered.
        status: ShutdownStatus,
    },

    /// Base asset deposited for shares.
    Deposit {
        /// Account the assets came from.
        sender: Address,
        /// Account credited with shares.
        receiver: Address,
        /// Base asset received.
        assets: u128,
        /// Shares minted.
        shares: u128,
    },

    /// Shares redeemed for base asset.
    Withdraw {
        /// Account whose shares were burned.
        owner: Address,
        /// Account the assets were sent to.
        receiver: Address,
        /// Base asset sent.
        assets: u128,
        /// Shares burned.
        shares: u128,
    },

    /// An executed rebalance was booked.
    RebalanceApplied {
        /// Destination that received funds (the vault itself for idle).
        destination_in: Address,
        /// Destination that gave up funds (the vault itself for idle).
        destination_out: Address,
        /// Base-asset value received.
        value_in: u128,
        /// Base-asset value given up.
        value_out: u128,
    },
}
