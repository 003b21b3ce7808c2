//! # Venue Boundary
//!
//! Everything that actually moves tokens lives behind [`Venue`]. The ledger
//! calls into it and then re-reads [`Venue::base_asset_balance`]: the
//! amount that arrived is whatever the balance says, never whatever the
//! call claimed. A venue that lies, takes a cut, or calls back into
//! something shows up as a delta, not as a corrupted ledger.
//!
//! [`MemoryVenue`] is a complete in-memory venue used by tests, benchmarks
//! and the node's simulations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::address::Address;
use crate::config::{BPS_DENOMINATOR, WAD};
use crate::math::mul_div;

/// Errors reported by a venue collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VenueError {
    /// The venue has no position for this destination.
    #[error("unknown destination {0}")]
    UnknownDestination(Address),

    /// An account or position does not hold enough.
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Amount asked for.
        requested: u128,
        /// Amount present.
        available: u128,
    },

    /// The venue refused or failed the call.
    #[error("venue call failed: {0}")]
    CallFailed(String),
}

/// Where underlying is pulled from when unwinding a destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtSource {
    /// Underlying held directly by the vault.
    Internal,
    /// Underlying staked with an external rewarder.
    External,
}

/// Token-moving collaborator of the ledger.
///
/// Ledger operations take a [`checkpoint`](Venue::checkpoint) before their
/// first call and hand it back to [`rollback`](Venue::rollback) when they
/// fail, which keeps the venue and the books in step.
pub trait Venue {
    /// Saved venue state.
    type Checkpoint;

    /// Captures the current state.
    fn checkpoint(&self) -> Self::Checkpoint;

    /// Restores the state captured by `checkpoint`, undoing every call made
    /// since.
    fn rollback(&mut self, checkpoint: Self::Checkpoint);

    /// Base asset currently held by the vault.
    fn base_asset_balance(&self) -> u128;

    /// Pulls `assets` of base asset from `from` into the vault.
    fn pull_deposit(&mut self, from: Address, assets: u128) -> Result<(), VenueError>;

    /// Unwinds `amount` of `destination`'s underlying from `source` and
    /// converts it to base asset held by the vault.
    fn withdraw_underlying(
        &mut self,
        destination: Address,
        source: DebtSource,
        amount: u128,
    ) -> Result<(), VenueError>;

    /// Claims pending rewards for `destination` into the vault as base
    /// asset. Returns gas used.
    fn claim_rewards(&mut self, destination: Address) -> Result<u64, VenueError>;

    /// Unwinds everything `destination` holds into base asset.
    fn recall_all(&mut self, destination: Address) -> Result<(), VenueError>;

    /// Sends `amount` of base asset from the vault to `to`.
    fn transfer_base_asset(&mut self, to: Address, amount: u128) -> Result<(), VenueError>;
}

// ---------------------------------------------------------------------------
// MemoryVenue
// ---------------------------------------------------------------------------

fn credit(balance: u128, amount: u128) -> Result<u128, VenueError> {
    balance
        .checked_add(amount)
        .ok_or_else(|| VenueError::CallFailed("balance overflow".into()))
}

/// Gas reported for a reward claim by [`MemoryVenue`].
pub const MEMORY_CLAIM_GAS: u64 = 21_000;

/// One destination position inside a [`MemoryVenue`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPosition {
    /// Underlying held directly.
    pub internal: u128,
    /// Underlying staked externally.
    pub external: u128,
    /// Base asset paid per unit of underlying, WAD-scaled.
    pub exchange_rate: u128,
    /// Rewards waiting to be claimed, in base asset.
    pub pending_rewards: u128,
}

/// In-memory venue.
///
/// Holds the vault's base-asset balance, one [`MemoryPosition`] per
/// destination and the base-asset balances of outside accounts. Optional
/// haircuts simulate slippage on unwinds and fees on outgoing transfers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryVenue {
    vault_balance: u128,
    positions: BTreeMap<Address, MemoryPosition>,
    accounts: BTreeMap<Address, u128>,
    unwind_haircut_bps: u128,
    transfer_fee_bps: u128,
}

impl MemoryVenue {
    /// Creates an empty venue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Credits an outside account with base asset.
    pub fn fund_account(&mut self, account: Address, amount: u128) -> Result<(), VenueError> {
        let balance = self.accounts.entry(account).or_default();
        *balance = credit(*balance, amount)?;
        Ok(())
    }

    /// Base asset held by an outside account.
    pub fn account_balance(&self, account: &Address) -> u128 {
        self.accounts.get(account).copied().unwrap_or(0)
    }

    /// Opens or replaces a position.
    pub fn set_position(
        &mut self,
        destination: Address,
        internal: u128,
        external: u128,
        exchange_rate: u128,
    ) {
        let position = self.positions.entry(destination).or_default();
        position.internal = internal;
        position.external = external;
        position.exchange_rate = exchange_rate;
    }

    /// Current position for `destination`.
    pub fn position(&self, destination: &Address) -> Option<&MemoryPosition> {
        self.positions.get(destination)
    }

    /// Queues rewards for the next claim.
    pub fn add_rewards(&mut self, destination: Address, amount: u128) -> Result<(), VenueError> {
        let position = self.positions.entry(destination).or_default();
        position.pending_rewards = credit(position.pending_rewards, amount)?;
        Ok(())
    }

    /// Changes the base-asset price of `destination`'s underlying.
    pub fn set_exchange_rate(&mut self, destination: Address, exchange_rate: u128) {
        self.positions.entry(destination).or_default().exchange_rate = exchange_rate;
    }

    /// Fraction of every unwind lost to slippage, in basis points.
    pub fn set_unwind_haircut_bps(&mut self, bps: u128) {
        self.unwind_haircut_bps = bps.min(BPS_DENOMINATOR);
    }

    /// Extra base asset burned on every outgoing transfer, in basis points.
    pub fn set_transfer_fee_bps(&mut self, bps: u128) {
        self.transfer_fee_bps = bps.min(BPS_DENOMINATOR);
    }

    /// Moves base asset from the vault into a position's underlying, as an
    /// executed rebalance would.
    pub fn deploy(
        &mut self,
        destination: Address,
        assets: u128,
        underlying: u128,
    ) -> Result<(), VenueError> {
        let held = self.positions.get(&destination).map_or(0, |p| p.internal);
        let internal = credit(held, underlying)?;
        self.debit_vault(assets)?;
        self.positions.entry(destination).or_default().internal = internal;
        Ok(())
    }

    fn credit_vault(&mut self, amount: u128) -> Result<(), VenueError> {
        self.vault_balance = credit(self.vault_balance, amount)?;
        Ok(())
    }

    fn debit_vault(&mut self, amount: u128) -> Result<(), VenueError> {
        if amount > self.vault_balance {
            return Err(VenueError::InsufficientBalance {
                requested: amount,
                available: self.vault_balance,
            });
        }
        self.vault_balance -= amount;
        Ok(())
    }

    fn proceeds(&self, underlying: u128, exchange_rate: u128) -> Result<u128, VenueError> {
        let gross = mul_div(underlying, exchange_rate, WAD)
            .ok_or_else(|| VenueError::CallFailed("proceeds overflow".into()))?;
        let haircut = mul_div(gross, self.unwind_haircut_bps, BPS_DENOMINATOR)
            .ok_or_else(|| VenueError::CallFailed("haircut overflow".into()))?;
        Ok(gross - haircut)
    }
}

impl Venue for MemoryVenue {
    type Checkpoint = MemoryVenue;

    fn checkpoint(&self) -> MemoryVenue {
        self.clone()
    }

    fn rollback(&mut self, checkpoint: MemoryVenue) {
        *self = checkpoint;
    }

    fn base_asset_balance(&self) -> u128 {
        self.vault_balance
    }

    fn pull_deposit(&mut self, from: Address, assets: u128) -> Result<(), VenueError> {
        let available = self.account_balance(&from);
        if assets > available {
            return Err(VenueError::InsufficientBalance {
                requested: assets,
                available,
            });
        }
        self.credit_vault(assets)?;
        self.accounts.insert(from, available - assets);
        Ok(())
    }

    fn withdraw_underlying(
        &mut self,
        destination: Address,
        source: DebtSource,
        amount: u128,
    ) -> Result<(), VenueError> {
        let position = self
            .positions
            .get(&destination)
            .ok_or(VenueError::UnknownDestination(destination))?;
        let held = match source {
            DebtSource::Internal => position.internal,
            DebtSource::External => position.external,
        };
        if amount > held {
            return Err(VenueError::InsufficientBalance {
                requested: amount,
                available: held,
            });
        }
        let proceeds = self.proceeds(amount, position.exchange_rate)?;
        self.credit_vault(proceeds)?;

        let position = self
            .positions
            .get_mut(&destination)
            .ok_or(VenueError::UnknownDestination(destination))?;
        match source {
            DebtSource::Internal => position.internal -= amount,
            DebtSource::External => position.external -= amount,
        }
        Ok(())
    }

    fn claim_rewards(&mut self, destination: Address) -> Result<u64, VenueError> {
        let pending = self
            .positions
            .get(&destination)
            .map_or(0, |position| position.pending_rewards);
        self.credit_vault(pending)?;
        if let Some(position) = self.positions.get_mut(&destination) {
            position.pending_rewards = 0;
        }
        Ok(MEMORY_CLAIM_GAS)
    }

    fn recall_all(&mut self, destination: Address) -> Result<(), VenueError> {
        let Some(position) = self.positions.get(&destination) else {
            return Ok(());
        };
        let underlying = credit(position.internal, position.external)?;
        let proceeds = self.proceeds(underlying, position.exchange_rate)?;
        let recovered = credit(proceeds, position.pending_rewards)?;
        let exchange_rate = position.exchange_rate;
        self.credit_vault(recovered)?;

        self.positions.insert(
            destination,
            MemoryPosition {
                exchange_rate,
                ..MemoryPosition::default()
            },
        );
        Ok(())
    }

    fn transfer_base_asset(&mut self, to: Address, amount: u128) -> Result<(), VenueError> {
        let fee = mul_div(amount, self.transfer_fee_bps, BPS_DENOMINATOR)
            .ok_or_else(|| VenueError::CallFailed("fee overflow".into()))?;
        let received = credit(self.account_balance(&to), amount)?;
        self.debit_vault(credit(amount, fee)?)?;
        self.accounts.insert(to, received);
        Ok(())
    }
}
