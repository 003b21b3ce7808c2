//! Rebalance parameters shared by the ledger and the strategy.
//!
//! The vault's own address stands in for "idle": a rebalance whose
//! `destination_in` is the vault moves funds out of a destination and back
//! into idle base asset.

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// A proposed or executed rebalance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceParams {
    /// Destination receiving funds.
    pub destination_in: Address,
    /// Token the receiving destination takes.
    pub token_in: Address,
    /// Amount of `token_in` received.
    pub amount_in: u128,
    /// Destination giving up funds.
    pub destination_out: Address,
    /// Token the giving destination releases.
    pub token_out: Address,
    /// Amount of `token_out` released.
    pub amount_out: u128,
}

impl RebalanceParams {
    /// Funds return to idle.
    pub fn is_to_idle(&self, vault: Address) -> bool {
        self.destination_in == vault
    }

    /// Funds come from idle.
    pub fn is_from_idle(&self, vault: Address) -> bool {
        self.destination_out == vault
    }
}
