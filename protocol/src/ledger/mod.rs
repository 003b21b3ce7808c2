//! # Debt Ledger
//!
//! The books of the vault: what has been deployed to each destination, the
//! order destinations are drained in when someone withdraws, which
//! destinations are on their way out, and whether the vault itself is
//! still open for business.
//!
//! ## Architecture
//!
//! ```text
//! destination.rs   DestinationInfo records, ShutdownStatus
//! queue.rs         WithdrawalQueue (ordered, unique), RemovalQueue
//! venue.rs         the Venue trait and the in-memory MemoryVenue
//! events.rs        VaultEvent log entries and report types
//! rebalance.rs     RebalanceParams shared with the strategy
//! ```
//!
//! ## Rules
//!
//! 1. **All-or-nothing.** Every mutating entry point stages its work on a
//!    copy of the ledger and commits only when the whole operation
//!    succeeded. Entry points that move tokens also take a
//!    [`Venue::checkpoint`] first and roll the venue back on failure, so a
//!    failed withdrawal leaves neither a half-drained destination on the
//!    books nor a half-unwound position at the venue.
//!
//! 2. **Diff-based accounting.** Whatever a venue call returns, the amount
//!    that moved is `base_asset_balance()` after minus before.
//!
//! 3. **Records are never deleted.** A retired destination's record is
//!    zeroed and the destination leaves the queues; the record stays.
//!
//! Operations that can fail after touching the venue still check
//! everything they can before the first call.

pub mod destination;
pub mod events;
pub mod queue;
pub mod rebalance;
pub mod venue;

pub use destination::{DestinationInfo, ShutdownStatus};
pub use events::{DebtReported, NavReport, VaultEvent};
pub use queue::{RemovalQueue, WithdrawalQueue};
pub use rebalance::RebalanceParams;
pub use venue::{DebtSource, MemoryVenue, Venue, VenueError};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::config::WAD;
use crate::error::{Classify, ErrorKind};
use crate::math::{mul_div, mul_div_up, wad_div};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by ledger operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The all-zero address was supplied.
    #[error("zero address supplied")]
    ZeroAddress,

    /// A zero amount was supplied, or an amount rounded down to nothing.
    #[error("zero amount")]
    ZeroAmount,

    /// An address cannot serve as a destination.
    #[error("invalid destination {0}")]
    InvalidDestination(Address),

    /// Rebalance parameters are malformed.
    #[error("invalid rebalance: {0}")]
    InvalidRebalance(String),

    /// A withdrawal queue replacement listed a destination twice.
    #[error("duplicate withdrawal queue entry {0}")]
    DuplicateQueueEntry(Address),

    /// The destination is not registered.
    #[error("destination {0} is not registered")]
    NotRegistered(Address),

    /// The destination is already registered.
    #[error("destination {0} is already registered")]
    AlreadyRegistered(Address),

    /// The vault is shut down.
    #[error("vault is shut down ({0})")]
    VaultShutdown(ShutdownStatus),

    /// The destination is shut down.
    #[error("destination {destination} is shut down ({status})")]
    DestinationShutdown {
        /// The destination.
        destination: Address,
        /// Its current status.
        status: ShutdownStatus,
    },

    /// Shutdown status only moves from active to a terminal state.
    #[error("cannot move from {from} to {to}")]
    InvalidShutdownTransition {
        /// Current status.
        from: ShutdownStatus,
        /// Requested status.
        to: ShutdownStatus,
    },

    /// The owner holds fewer shares than requested.
    #[error("insufficient shares: requested {requested}, held {held}")]
    InsufficientShares {
        /// Shares requested.
        requested: u128,
        /// Shares held.
        held: u128,
    },

    /// Idle plus the withdrawal queue cannot cover the request.
    #[error("insufficient liquidity: requested {requested}, available {available}")]
    InsufficientLiquidity {
        /// Base asset requested.
        requested: u128,
        /// Base asset that could be raised.
        available: u128,
    },

    /// A destination holds less underlying than a rebalance moves out.
    #[error("destination {destination} holds {available}, {requested} requested")]
    InsufficientDebt {
        /// The destination.
        destination: Address,
        /// Underlying requested.
        requested: u128,
        /// Underlying on the books.
        available: u128,
    },

    /// The vault's base-asset balance moved in a way the call cannot
    /// explain.
    #[error("unexpected base asset balance change: before {before}, after {after}")]
    UnexpectedBalanceChange {
        /// Balance before the call.
        before: u128,
        /// Balance after the call.
        after: u128,
    },

    /// A report claims value for a destination with no underlying.
    #[error("inconsistent report for {0}: value without underlying")]
    InconsistentReport(Address),

    /// A venue call failed.
    #[error(transparent)]
    Venue(#[from] VenueError),

    /// Checked arithmetic overflowed.
    #[error("arithmetic overflow")]
    MathOverflow,
}

impl Classify for LedgerError {
    fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::ZeroAddress
            | LedgerError::ZeroAmount
            | LedgerError::InvalidDestination(_)
            | LedgerError::InvalidRebalance(_)
            | LedgerError::DuplicateQueueEntry(_)
            | LedgerError::InsufficientShares { .. }
            | LedgerError::InconsistentReport(_) => ErrorKind::Validation,
            LedgerError::NotRegistered(_)
            | LedgerError::AlreadyRegistered(_)
            | LedgerError::VaultShutdown(_)
            | LedgerError::DestinationShutdown { .. }
            | LedgerError::InvalidShutdownTransition { .. }
            | LedgerError::InsufficientDebt { .. } => ErrorKind::State,
            LedgerError::InsufficientLiquidity { .. } => ErrorKind::Liquidity,
            LedgerError::UnexpectedBalanceChange { .. } | LedgerError::Venue(_) => {
                ErrorKind::External
            }
            LedgerError::MathOverflow => ErrorKind::Arithmetic,
        }
    }
}

fn non_zero(address: Address) -> Result<(), LedgerError> {
    if address.is_zero() {
        return Err(LedgerError::ZeroAddress);
    }
    Ok(())
}

fn add(a: u128, b: u128) -> Result<u128, LedgerError> {
    a.checked_add(b).ok_or(LedgerError::MathOverflow)
}

/// Runs `call` and returns its result with the base asset that arrived.
fn inflow<V, R>(
    venue: &mut V,
    call: impl FnOnce(&mut V) -> Result<R, VenueError>,
) -> Result<(R, u128), LedgerError>
where
    V: Venue,
{
    let before = venue.base_asset_balance();
    let result = call(venue)?;
    let after = venue.base_asset_balance();
    let received = after
        .checked_sub(before)
        .ok_or(LedgerError::UnexpectedBalanceChange { before, after })?;
    Ok((result, received))
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

/// Static identity of a ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// The vault's own address. Doubles as the "idle" destination id.
    pub vault: Address,
    /// The base asset deposits and withdrawals are denominated in.
    pub base_asset: Address,
}

/// What one destination contributed to a withdrawal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationPull {
    /// The destination.
    pub destination: Address,
    /// Underlying unwound.
    pub underlying: u128,
    /// Book value removed from the destination.
    pub value: u128,
    /// Base asset observed arriving.
    pub received: u128,
}

/// Outcome of a withdrawal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    /// Base asset sent to the receiver.
    pub assets: u128,
    /// Shares burned.
    pub shares: u128,
    /// Portion covered from idle.
    pub from_idle: u128,
    /// Destinations unwound, in queue order.
    pub pulls: Vec<DestinationPull>,
}

// ---------------------------------------------------------------------------
// DebtLedger
// ---------------------------------------------------------------------------

/// Destination debt, queues, shutdown state and shares of one vault.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtLedger {
    config: LedgerConfig,
    status: ShutdownStatus,
    destinations: BTreeMap<Address, DestinationInfo>,
    destination_status: BTreeMap<Address, ShutdownStatus>,
    registered: BTreeSet<Address>,
    withdrawal_queue: WithdrawalQueue,
    removal_queue: RemovalQueue,
    total_idle: u128,
    total_debt: u128,
    total_supply: u128,
    share_balances: BTreeMap<Address, u128>,
    #[serde(skip)]
    events: Vec<VaultEvent>,
}

impl DebtLedger {
    /// Creates an empty, active ledger.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ZeroAddress`] if either address in `config` is zero.
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        non_zero(config.vault)?;
        non_zero(config.base_asset)?;
        Ok(Self {
            config,
            status: ShutdownStatus::Active,
            destinations: BTreeMap::new(),
            destination_status: BTreeMap::new(),
            registered: BTreeSet::new(),
            withdrawal_queue: WithdrawalQueue::new(),
            removal_queue: RemovalQueue::new(),
            total_idle: 0,
            total_debt: 0,
            total_supply: 0,
            share_balances: BTreeMap::new(),
            events: Vec::new(),
        })
    }

    /// Runs `op` against a staged copy and commits it only on success.
    fn transact<T>(
        &mut self,
        op: impl FnOnce(&mut DebtLedger) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut staged = self.clone();
        let out = op(&mut staged)?;
        *self = staged;
        Ok(out)
    }

    /// [`transact`](Self::transact) for operations that move tokens: the
    /// venue is rolled back to its checkpoint when `op` fails.
    fn transact_with<V: Venue, T>(
        &mut self,
        venue: &mut V,
        op: impl FnOnce(&mut DebtLedger, &mut V) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let checkpoint = venue.checkpoint();
        let mut staged = self.clone();
        match op(&mut staged, venue) {
            Ok(out) => {
                *self = staged;
                Ok(out)
            }
            Err(err) => {
                venue.rollback(checkpoint);
                Err(err)
            }
        }
    }

    // -- Destinations -------------------------------------------------------

    /// Registers destinations. The whole batch fails if any entry does.
    pub fn add_destinations(&mut self, destinations: &[Address]) -> Result<(), LedgerError> {
        let vault = self.config.vault;
        self.transact(|ledger| {
            for &destination in destinations {
                non_zero(destination)?;
                if destination == vault || destination == ledger.config.base_asset {
                    return Err(LedgerError::InvalidDestination(destination));
                }
                if !ledger.registered.insert(destination) {
                    return Err(LedgerError::AlreadyRegistered(destination));
                }
                ledger.destinations.entry(destination).or_default();
                ledger
                    .destination_status
                    .entry(destination)
                    .or_insert(ShutdownStatus::Active);
                ledger
                    .events
                    .push(VaultEvent::DestinationAdded { destination });
                info!(destination = %destination, "destination added");
            }
            Ok(())
        })
    }

    /// Deregisters drained destinations immediately and flags the rest for
    /// removal once they are drained.
    pub fn remove_destinations(&mut self, destinations: &[Address]) -> Result<(), LedgerError> {
        self.transact(|ledger| {
            for &destination in destinations {
                ledger.require_registered(destination)?;
                let drained = ledger
                    .destinations
                    .get(&destination)
                    .map_or(true, DestinationInfo::is_drained);
                if drained {
                    ledger.deregister(destination);
                } else if ledger.removal_queue.insert(destination) {
                    ledger
                        .events
                        .push(VaultEvent::DestinationQueuedForRemoval { destination });
                    info!(destination = %destination, "destination queued for removal");
                }
            }
            Ok(())
        })
    }

    /// Moves a destination out of the active state.
    pub fn set_destination_status(
        &mut self,
        destination: Address,
        status: ShutdownStatus,
    ) -> Result<(), LedgerError> {
        self.require_registered(destination)?;
        let from = self.destination_status(&destination);
        if !from.can_transition_to(status) {
            return Err(LedgerError::InvalidShutdownTransition { from, to: status });
        }
        self.destination_status.insert(destination, status);
        self.events.push(VaultEvent::DestinationShutdown {
            destination,
            status,
        });
        warn!(destination = %destination, %status, "destination shut down");
        Ok(())
    }

    fn require_registered(&self, destination: Address) -> Result<(), LedgerError> {
        non_zero(destination)?;
        if !self.registered.contains(&destination) {
            return Err(LedgerError::NotRegistered(destination));
        }
        Ok(())
    }

    fn deregister(&mut self, destination: Address) {
        self.registered.remove(&destination);
        self.withdrawal_queue.remove(&destination);
        self.removal_queue.remove(&destination);
        self.events
            .push(VaultEvent::DestinationRemoved { destination });
        info!(destination = %destination, "destination removed");
    }

    fn retire_if_drained(&mut self, destination: Address) {
        let drained = self
            .destinations
            .get(&destination)
            .map_or(true, DestinationInfo::is_drained);
        if drained && self.removal_queue.contains(&destination) {
            self.deregister(destination);
        }
    }

    fn recompute_debt(&mut self) -> Result<(), LedgerError> {
        self.total_debt = self
            .destinations
            .values()
            .try_fold(0u128, |acc, info| acc.checked_add(info.last_reported_value))
            .ok_or(LedgerError::MathOverflow)?;
        Ok(())
    }

    // -- Withdrawal queue ---------------------------------------------------

    /// Replaces the withdrawal queue.
    pub fn set_withdrawal_queue(&mut self, entries: Vec<Address>) -> Result<(), LedgerError> {
        for destination in &entries {
            self.require_registered(*destination)?;
        }
        self.withdrawal_queue
            .set(entries)
            .map_err(LedgerError::DuplicateQueueEntry)?;
        info!(len = self.withdrawal_queue.len(), "withdrawal queue replaced");
        Ok(())
    }

    /// Moves `destination` to the front of the withdrawal queue.
    pub fn add_to_withdrawal_queue_head(&mut self, destination: Address) -> Result<(), LedgerError> {
        self.require_registered(destination)?;
        self.withdrawal_queue.add_to_head(destination);
        debug!(destination = %destination, "withdrawal queue head");
        Ok(())
    }

    /// Moves `destination` to the back of the withdrawal queue.
    pub fn add_to_withdrawal_queue_tail(&mut self, destination: Address) -> Result<(), LedgerError> {
        self.require_registered(destination)?;
        self.withdrawal_queue.add_to_tail(destination);
        debug!(destination = %destination, "withdrawal queue tail");
        Ok(())
    }

    // -- Reporting ----------------------------------------------------------

    /// Overwrites a destination's record with a fresh report and claims its
    /// rewards into idle.
    ///
    /// A drained destination that is pending removal is deregistered.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotRegistered`] for an unknown destination.
    /// - [`LedgerError::InconsistentReport`] for value without underlying.
    /// - Venue failures from the reward claim.
    pub fn record_debt_report<V: Venue>(
        &mut self,
        venue: &mut V,
        destination: Address,
        internal_debt_amount: u128,
        external_debt_amount: u128,
        value: u128,
        now: u64,
    ) -> Result<DebtReported, LedgerError> {
        self.require_registered(destination)?;
        let underlying = add(internal_debt_amount, external_debt_amount)?;
        if underlying == 0 && value != 0 {
            return Err(LedgerError::InconsistentReport(destination));
        }

        self.transact_with(venue, |ledger, venue| {
            ledger.destinations.insert(
                destination,
                DestinationInfo {
                    internal_debt_amount,
                    external_debt_amount,
                    last_reported_value: value,
                    last_report_timestamp: now,
                },
            );
            ledger.recompute_debt()?;

            let (gas_used, amount_claimed) = inflow(venue, |v| v.claim_rewards(destination))?;
            ledger.total_idle = add(ledger.total_idle, amount_claimed)?;

            let report = DebtReported {
                destination,
                new_value: value,
                amount_claimed,
                gas_used,
            };
            ledger.events.push(VaultEvent::DebtReported(report.clone()));
            info!(
                destination = %destination,
                value,
                underlying,
                amount_claimed,
                "debt reported"
            );
            ledger.retire_if_drained(destination);
            Ok(report)
        })
    }

    /// Closes a reporting round and returns the figures the owner samples
    /// into its NAV history.
    pub fn finalize_reporting(&mut self, now: u64) -> Result<NavReport, LedgerError> {
        let report = NavReport {
            idle: self.total_idle,
            debt: self.total_debt,
            total_supply: self.total_supply,
            nav_per_share: self.nav_per_share()?,
            timestamp: now,
        };
        self.events.push(VaultEvent::Nav {
            idle: report.idle,
            debt: report.debt,
            total_supply: report.total_supply,
        });
        info!(
            idle = report.idle,
            debt = report.debt,
            supply = report.total_supply,
            nav = report.nav_per_share,
            "reporting finalized"
        );
        Ok(report)
    }

    // -- Deposits and withdrawals ---------------------------------------------

    /// Pulls `assets` from `sender` and mints shares to `receiver` for the
    /// amount that actually arrived. Returns shares minted.
    pub fn deposit<V: Venue>(
        &mut self,
        venue: &mut V,
        sender: Address,
        receiver: Address,
        assets: u128,
    ) -> Result<u128, LedgerError> {
        non_zero(sender)?;
        non_zero(receiver)?;
        if assets == 0 || self.convert_to_shares(assets)? == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        if !self.status.is_active() {
            return Err(LedgerError::VaultShutdown(self.status));
        }

        self.transact_with(venue, |ledger, venue| {
            let ((), received) = inflow(venue, |v| v.pull_deposit(sender, assets))?;
            let shares = ledger.convert_to_shares(received)?;
            if shares == 0 {
                return Err(LedgerError::ZeroAmount);
            }
            ledger.total_idle = add(ledger.total_idle, received)?;
            ledger.mint(receiver, shares)?;
            ledger.events.push(VaultEvent::Deposit {
                sender,
                receiver,
                assets: received,
                shares,
            });
            info!(receiver = %receiver, assets = received, shares, "deposit");
            Ok(shares)
        })
    }

    /// Redeems `shares` of `owner` and sends the base asset to `receiver`.
    ///
    /// Idle is drained first, then the withdrawal queue in order. Each
    /// destination unwinds internal underlying before external.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InsufficientLiquidity`] when idle plus the queued
    /// destinations cannot cover the request, or when unwinds return less
    /// than booked. Neither the ledger nor the venue changes on any error.
    pub fn withdraw<V: Venue>(
        &mut self,
        venue: &mut V,
        shares: u128,
        owner: Address,
        receiver: Address,
    ) -> Result<WithdrawReceipt, LedgerError> {
        non_zero(owner)?;
        non_zero(receiver)?;
        if shares == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let held = self.share_balance(&owner);
        if shares > held {
            return Err(LedgerError::InsufficientShares {
                requested: shares,
                held,
            });
        }
        let target = self.convert_to_assets(shares)?;
        if target == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let available = self.withdrawable_liquidity()?;
        if available < target {
            warn!(requested = target, available, "withdrawal exceeds liquidity");
            return Err(LedgerError::InsufficientLiquidity {
                requested: target,
                available,
            });
        }

        self.transact_with(venue, |ledger, venue| {
            ledger.withdraw_staged(venue, shares, owner, receiver, target)
        })
    }

    fn withdraw_staged<V: Venue>(
        &mut self,
        venue: &mut V,
        shares: u128,
        owner: Address,
        receiver: Address,
        target: u128,
    ) -> Result<WithdrawReceipt, LedgerError> {
        let from_idle = self.total_idle.min(target);
        self.total_idle -= from_idle;
        let mut remaining = target - from_idle;

        let mut pulls = Vec::new();
        let queue = self.withdrawal_queue.as_slice().to_vec();
        for destination in queue {
            if remaining == 0 {
                break;
            }
            let Some(pull) = self.pull_from_destination(venue, destination, remaining)? else {
                continue;
            };
            let used = pull.received.min(remaining);
            remaining -= used;
            self.total_idle = add(self.total_idle, pull.received - used)?;
            pulls.push(pull);
        }
        if remaining > 0 {
            warn!(requested = target, remaining, "withdrawal queue exhausted");
            return Err(LedgerError::InsufficientLiquidity {
                requested: target,
                available: target - remaining,
            });
        }
        self.recompute_debt()?;

        let before = venue.base_asset_balance();
        venue.transfer_base_asset(receiver, target)?;
        let after = venue.base_asset_balance();
        if before.checked_sub(after) != Some(target) {
            return Err(LedgerError::UnexpectedBalanceChange { before, after });
        }

        self.burn(owner, shares)?;
        self.events.push(VaultEvent::Withdraw {
            owner,
            receiver,
            assets: target,
            shares,
        });
        info!(
            owner = %owner,
            receiver = %receiver,
            assets = target,
            shares,
            from_idle,
            destinations = pulls.len(),
            "withdraw"
        );
        Ok(WithdrawReceipt {
            assets: target,
            shares,
            from_idle,
            pulls,
        })
    }

    /// Unwinds enough of `destination` to cover `remaining` at book value.
    fn pull_from_destination<V: Venue>(
        &mut self,
        venue: &mut V,
        destination: Address,
        remaining: u128,
    ) -> Result<Option<DestinationPull>, LedgerError> {
        let info = self
            .destinations
            .get(&destination)
            .copied()
            .unwrap_or_default();
        let underlying = info.underlying().ok_or(LedgerError::MathOverflow)?;
        let value = info.last_reported_value;
        if value == 0 || underlying == 0 {
            return Ok(None);
        }

        let wanted = remaining.min(value);
        let to_pull = mul_div_up(wanted, underlying, value)
            .ok_or(LedgerError::MathOverflow)?
            .min(underlying);
        let from_internal = to_pull.min(info.internal_debt_amount);
        let from_external = (to_pull - from_internal).min(info.external_debt_amount);

        let mut received = 0;
        if from_internal > 0 {
            let ((), got) = inflow(venue, |v| {
                v.withdraw_underlying(destination, DebtSource::Internal, from_internal)
            })?;
            received = add(received, got)?;
        }
        if from_external > 0 {
            let ((), got) = inflow(venue, |v| {
                v.withdraw_underlying(destination, DebtSource::External, from_external)
            })?;
            received = add(received, got)?;
        }

        let pulled = from_internal + from_external;
        let value_removed = if pulled == underlying {
            value
        } else {
            mul_div(value, pulled, underlying).ok_or(LedgerError::MathOverflow)?
        };
        self.destinations.insert(
            destination,
            DestinationInfo {
                internal_debt_amount: info.internal_debt_amount - from_internal,
                external_debt_amount: info.external_debt_amount - from_external,
                last_reported_value: value - value_removed,
                last_report_timestamp: info.last_report_timestamp,
            },
        );
        debug!(
            destination = %destination,
            underlying = pulled,
            value = value_removed,
            received,
            "destination unwound"
        );
        self.retire_if_drained(destination);

        Ok(Some(DestinationPull {
            destination,
            underlying: pulled,
            value: value_removed,
            received,
        }))
    }

    fn mint(&mut self, owner: Address, shares: u128) -> Result<(), LedgerError> {
        self.total_supply = add(self.total_supply, shares)?;
        let balance = self.share_balances.entry(owner).or_default();
        *balance = add(*balance, shares)?;
        Ok(())
    }

    fn burn(&mut self, owner: Address, shares: u128) -> Result<(), LedgerError> {
        let held = self.share_balance(&owner);
        let left = held
            .checked_sub(shares)
            .ok_or(LedgerError::InsufficientShares {
                requested: shares,
                held,
            })?;
        if left == 0 {
            self.share_balances.remove(&owner);
        } else {
            self.share_balances.insert(owner, left);
        }
        self.total_supply = self
            .total_supply
            .checked_sub(shares)
            .ok_or(LedgerError::MathOverflow)?;
        Ok(())
    }

    // -- Shutdown -----------------------------------------------------------

    /// Shuts the vault down, recalling every destination into idle.
    ///
    /// Returns the base asset recovered.
    pub fn shutdown<V: Venue>(
        &mut self,
        venue: &mut V,
        reason: ShutdownStatus,
    ) -> Result<u128, LedgerError> {
        if !self.status.can_transition_to(reason) {
            return Err(LedgerError::InvalidShutdownTransition {
                from: self.status,
                to: reason,
            });
        }

        self.transact_with(venue, |ledger, venue| {
            let mut recovered = 0;
            let destinations: Vec<Address> = ledger.registered.iter().copied().collect();
            for destination in destinations {
                let ((), got) = inflow(venue, |v| v.recall_all(destination))?;
                recovered = add(recovered, got)?;
                if let Some(info) = ledger.destinations.get_mut(&destination) {
                    info.clear();
                }
            }
            ledger.total_idle = add(ledger.total_idle, recovered)?;
            ledger.recompute_debt()?;

            let pending: Vec<Address> = ledger.removal_queue.iter().copied().collect();
            for destination in pending {
                ledger.deregister(destination);
            }

            ledger.status = reason;
            ledger.events.push(VaultEvent::Shutdown { reason });
            warn!(%reason, recovered, "vault shut down");
            Ok(recovered)
        })
    }

    // -- Rebalance booking --------------------------------------------------

    /// Books a rebalance the strategy accepted and a collaborator executed.
    ///
    /// `value_in` is the base-asset value of what `destination_in`
    /// received; the book value leaving `destination_out` is its recorded
    /// value scaled by the share of underlying moved.
    pub fn apply_rebalance(
        &mut self,
        params: &RebalanceParams,
        value_in: u128,
        value_out: u128,
    ) -> Result<(), LedgerError> {
        let vault = self.config.vault;
        let base_asset = self.config.base_asset;
        non_zero(params.destination_in)?;
        non_zero(params.destination_out)?;
        if params.destination_in == params.destination_out {
            return Err(LedgerError::InvalidRebalance(
                "destinations must differ".into(),
            ));
        }
        if params.amount_in == 0 || params.amount_out == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let to_idle = params.is_to_idle(vault);
        let from_idle = params.is_from_idle(vault);
        if to_idle && params.token_in != base_asset {
            return Err(LedgerError::InvalidRebalance(
                "idle only receives the base asset".into(),
            ));
        }
        if from_idle && params.token_out != base_asset {
            return Err(LedgerError::InvalidRebalance(
                "idle only releases the base asset".into(),
            ));
        }
        if !to_idle {
            if !self.status.is_active() {
                return Err(LedgerError::VaultShutdown(self.status));
            }
            self.require_registered(params.destination_in)?;
            let status = self.destination_status(&params.destination_in);
            if !status.is_active() {
                return Err(LedgerError::DestinationShutdown {
                    destination: params.destination_in,
                    status,
                });
            }
        }

        self.transact(|ledger| {
            if from_idle {
                if params.amount_out > ledger.total_idle {
                    return Err(LedgerError::InsufficientLiquidity {
                        requested: params.amount_out,
                        available: ledger.total_idle,
                    });
                }
                ledger.total_idle -= params.amount_out;
            } else {
                ledger.book_outflow(params.destination_out, params.amount_out)?;
            }

            if to_idle {
                ledger.total_idle = add(ledger.total_idle, params.amount_in)?;
            } else {
                let info = ledger
                    .destinations
                    .entry(params.destination_in)
                    .or_default();
                info.internal_debt_amount = add(info.internal_debt_amount, params.amount_in)?;
                info.last_reported_value = add(info.last_reported_value, value_in)?;
                ledger.withdrawal_queue.push_if_absent(params.destination_in);
            }
            ledger.recompute_debt()?;

            ledger.events.push(VaultEvent::RebalanceApplied {
                destination_in: params.destination_in,
                destination_out: params.destination_out,
                value_in,
                value_out,
            });
            info!(
                destination_in = %params.destination_in,
                destination_out = %params.destination_out,
                value_in,
                value_out,
                "rebalance applied"
            );
            Ok(())
        })
    }

    fn book_outflow(&mut self, destination: Address, amount: u128) -> Result<(), LedgerError> {
        self.require_registered(destination)?;
        let info = self
            .destinations
            .get(&destination)
            .copied()
            .unwrap_or_default();
        let underlying = info.underlying().ok_or(LedgerError::MathOverflow)?;
        if amount > underlying {
            return Err(LedgerError::InsufficientDebt {
                destination,
                requested: amount,
                available: underlying,
            });
        }
        let from_internal = amount.min(info.internal_debt_amount);
        let from_external = amount - from_internal;
        let value_removed = if amount == underlying {
            info.last_reported_value
        } else {
            mul_div(info.last_reported_value, amount, underlying)
                .ok_or(LedgerError::MathOverflow)?
        };
        self.destinations.insert(
            destination,
            DestinationInfo {
                internal_debt_amount: info.internal_debt_amount - from_internal,
                external_debt_amount: info.external_debt_amount - from_external,
                last_reported_value: info.last_reported_value - value_removed,
                last_report_timestamp: info.last_report_timestamp,
            },
        );
        self.retire_if_drained(destination);
        Ok(())
    }

    // -- Conversions --------------------------------------------------------

    /// Idle plus debt.
    pub fn total_assets(&self) -> Result<u128, LedgerError> {
        add(self.total_idle, self.total_debt)
    }

    /// Shares minted for `assets`. One to one while no shares exist.
    pub fn convert_to_shares(&self, assets: u128) -> Result<u128, LedgerError> {
        if self.total_supply == 0 {
            return Ok(assets);
        }
        mul_div(assets, self.total_supply, self.total_assets()?).ok_or(LedgerError::MathOverflow)
    }

    /// Base asset redeemed for `shares`. One to one while no shares exist.
    pub fn convert_to_assets(&self, shares: u128) -> Result<u128, LedgerError> {
        if self.total_supply == 0 {
            return Ok(shares);
        }
        mul_div(shares, self.total_assets()?, self.total_supply).ok_or(LedgerError::MathOverflow)
    }

    /// Total assets per share, WAD-scaled. [`WAD`] while no shares exist.
    pub fn nav_per_share(&self) -> Result<u128, LedgerError> {
        if self.total_supply == 0 {
            return Ok(WAD);
        }
        wad_div(self.total_assets()?, self.total_supply).ok_or(LedgerError::MathOverflow)
    }

    /// Idle plus the book value of every queued destination.
    pub fn withdrawable_liquidity(&self) -> Result<u128, LedgerError> {
        self.withdrawal_queue
            .as_slice()
            .iter()
            .filter_map(|d| self.destinations.get(d))
            .try_fold(self.total_idle, |acc, info| {
                acc.checked_add(info.last_reported_value)
            })
            .ok_or(LedgerError::MathOverflow)
    }

    // -- Accessors ----------------------------------------------------------

    /// Static identity.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Vault shutdown status.
    pub fn status(&self) -> ShutdownStatus {
        self.status
    }

    /// Record for `destination`, including retired ones.
    pub fn destination_info(&self, destination: &Address) -> Option<&DestinationInfo> {
        self.destinations.get(destination)
    }

    /// Status of `destination`; unknown destinations read as active.
    pub fn destination_status(&self, destination: &Address) -> ShutdownStatus {
        self.destination_status
            .get(destination)
            .copied()
            .unwrap_or_default()
    }

    /// Whether `destination` is registered.
    pub fn is_registered(&self, destination: &Address) -> bool {
        self.registered.contains(destination)
    }

    /// Registered destinations in address order.
    pub fn registered_destinations(&self) -> impl Iterator<Item = &Address> {
        self.registered.iter()
    }

    /// The withdrawal queue.
    pub fn withdrawal_queue(&self) -> &WithdrawalQueue {
        &self.withdrawal_queue
    }

    /// Destinations pending removal.
    pub fn removal_queue(&self) -> &RemovalQueue {
        &self.removal_queue
    }

    /// Idle base asset.
    pub fn total_idle(&self) -> u128 {
        self.total_idle
    }

    /// Sum of destination values.
    pub fn total_debt(&self) -> u128 {
        self.total_debt
    }

    /// Outstanding shares.
    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    /// Shares held by `owner`.
    pub fn share_balance(&self, owner: &Address) -> u128 {
        self.share_balances.get(owner).copied().unwrap_or(0)
    }

    /// Takes every event logged since the last drain.
    pub fn drain_events(&mut self) -> Vec<VaultEvent> {
        std::mem::take(&mut self.events)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const VAULT: Address = Address::repeat_byte(0xAA);
    const BASE: Address = Address::repeat_byte(0xBA);
    const ALICE: Address = Address::repeat_byte(0xA1);
    const BOB: Address = Address::repeat_byte(0xB0);
    const D1: Address = Address::repeat_byte(0xD1);
    const D2: Address = Address::repeat_byte(0xD2);
    const D3: Address = Address::repeat_byte(0xD3);

    fn ledger() -> DebtLedger {
        DebtLedger::new(LedgerConfig {
            vault: VAULT,
            base_asset: BASE,
        })
        .unwrap()
    }

    /// Ledger with 1_000 deposited by ALICE, 600 deployed across D1 and D2
    /// at a 1:1 exchange rate, queue [D1, D2].
    fn funded() -> (DebtLedger, MemoryVenue) {
        let mut ledger = ledger();
        let mut venue = MemoryVenue::new();
        venue.fund_account(ALICE, 1_000).unwrap();
        ledger.deposit(&mut venue, ALICE, ALICE, 1_000).unwrap();
        ledger.add_destinations(&[D1, D2]).unwrap();

        for (dest, amount) in [(D1, 400u128), (D2, 200u128)] {
            venue.deploy(dest, amount, amount).unwrap();
            venue.set_exchange_rate(dest, WAD);
            ledger
                .apply_rebalance(
                    &RebalanceParams {
                        destination_in: dest,
                        token_in: dest,
                        amount_in: amount,
                        destination_out: VAULT,
                        token_out: BASE,
                        amount_out: amount,
                    },
                    amount,
                    amount,
                )
                .unwrap();
        }
        ledger.drain_events();
        (ledger, venue)
    }

    #[test]
    fn new_rejects_zero_addresses() {
        let err = DebtLedger::new(LedgerConfig {
            vault: Address::ZERO,
            base_asset: BASE,
        })
        .unwrap_err();
        assert_eq!(err, LedgerError::ZeroAddress);
    }

    #[test]
    fn first_deposit_mints_one_to_one() {
        let (ledger, venue) = funded();
        assert_eq!(ledger.total_supply(), 1_000);
        assert_eq!(ledger.share_balance(&ALICE), 1_000);
        assert_eq!(ledger.total_idle(), 400);
        assert_eq!(ledger.total_debt(), 600);
        assert_eq!(venue.base_asset_balance(), ledger.total_idle());
        assert_eq!(ledger.withdrawal_queue().as_slice(), &[D1, D2]);
    }

    #[test]
    fn head_insertion_relocates() {
        let mut ledger = ledger();
        ledger.add_destinations(&[D1, D2, D3]).unwrap();
        ledger.set_withdrawal_queue(vec![D1, D2, D3]).unwrap();
        ledger.add_to_withdrawal_queue_head(D2).unwrap();
        assert_eq!(ledger.withdrawal_queue().as_slice(), &[D2, D1, D3]);
    }

    #[test]
    fn queue_only_holds_registered_destinations() {
        let mut ledger = ledger();
        ledger.add_destinations(&[D1]).unwrap();
        assert_eq!(
            ledger.add_to_withdrawal_queue_tail(D2),
            Err(LedgerError::NotRegistered(D2))
        );
        assert_eq!(
            ledger.set_withdrawal_queue(vec![D1, D1]),
            Err(LedgerError::DuplicateQueueEntry(D1))
        );
        assert!(ledger.withdrawal_queue().is_empty());
    }

    #[test]
    fn over_withdrawal_changes_nothing() {
        let (mut ledger, mut venue) = funded();
        // Nobody else has shares; mint BOB a claim that exceeds liquidity
        // by dropping D2 from the queue.
        ledger.set_withdrawal_queue(vec![D1]).unwrap();
        let before = ledger.clone();
        let venue_before = venue.clone();

        let err = ledger.withdraw(&mut venue, 900, ALICE, BOB).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientLiquidity {
                requested: 900,
                available: 800
            }
        );
        assert_eq!(err.kind(), ErrorKind::Liquidity);
        assert_eq!(ledger, before);
        assert_eq!(venue, venue_before);
    }

    #[test]
    fn withdraw_drains_idle_then_queue_in_order() {
        let (mut ledger, mut venue) = funded();
        let receipt = ledger.withdraw(&mut venue, 500, ALICE, BOB).unwrap();

        assert_eq!(receipt.assets, 500);
        assert_eq!(receipt.from_idle, 400);
        assert_eq!(receipt.pulls.len(), 1);
        assert_eq!(receipt.pulls[0].destination, D1);
        assert_eq!(receipt.pulls[0].received, 100);

        assert_eq!(ledger.destination_info(&D1).unwrap().last_reported_value, 300);
        assert_eq!(ledger.destination_info(&D2).unwrap().last_reported_value, 200);
        assert_eq!(ledger.total_idle(), 0);
        assert_eq!(ledger.total_debt(), 500);
        assert_eq!(ledger.total_supply(), 500);
        assert_eq!(venue.account_balance(&BOB), 500);
    }

    #[test]
    fn shortfall_after_walk_rolls_back_ledger() {
        let (mut ledger, mut venue) = funded();
        // Unwinds now return half of book value.
        venue.set_unwind_haircut_bps(5_000);
        let before = ledger.clone();
        let venue_before = venue.clone();
        let err = ledger.withdraw(&mut venue, 1_000, ALICE, BOB).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientLiquidity { .. }));
        assert_eq!(ledger, before);
        assert_eq!(venue, venue_before);

        // Books and positions still agree, so a clean retry drains everything.
        venue.set_unwind_haircut_bps(0);
        let receipt = ledger.withdraw(&mut venue, 1_000, ALICE, BOB).unwrap();
        assert_eq!(receipt.assets, 1_000);
        assert_eq!(receipt.pulls.len(), 2);
        assert_eq!(venue.account_balance(&BOB), 1_000);
        assert_eq!(ledger.total_debt(), 0);
        assert_eq!(venue.base_asset_balance(), ledger.total_idle());
    }

    #[test]
    fn transfer_skim_is_detected() {
        let (mut ledger, mut venue) = funded();
        venue.set_transfer_fee_bps(100);
        let before = ledger.clone();
        let venue_before = venue.clone();
        let err = ledger.withdraw(&mut venue, 100, ALICE, BOB).unwrap_err();
        assert!(matches!(err, LedgerError::UnexpectedBalanceChange { .. }));
        assert_eq!(err.kind(), ErrorKind::External);
        assert_eq!(ledger, before);
        assert_eq!(venue, venue_before);
        assert_eq!(venue.account_balance(&BOB), 0);
    }

    #[test]
    fn report_claims_rewards_from_observed_delta() {
        let (mut ledger, mut venue) = funded();
        venue.add_rewards(D1, 25).unwrap();
        let report = ledger
            .record_debt_report(&mut venue, D1, 400, 0, 420, 1_000)
            .unwrap();
        assert_eq!(report.amount_claimed, 25);
        assert_eq!(report.new_value, 420);
        assert_eq!(ledger.total_idle(), 425);
        assert_eq!(ledger.total_debt(), 620);
        let events = ledger.drain_events();
        assert!(matches!(events.as_slice(), [VaultEvent::DebtReported(r)] if r.destination == D1));
    }

    #[test]
    fn report_with_value_but_no_underlying_rejected() {
        let (mut ledger, mut venue) = funded();
        assert_eq!(
            ledger.record_debt_report(&mut venue, D1, 0, 0, 5, 1),
            Err(LedgerError::InconsistentReport(D1))
        );
    }

    #[test]
    fn pending_removal_retires_when_drained() {
        let (mut ledger, mut venue) = funded();
        ledger.remove_destinations(&[D2]).unwrap();
        assert!(ledger.removal_queue().contains(&D2));
        assert!(ledger.is_registered(&D2));

        ledger
            .record_debt_report(&mut venue, D2, 0, 0, 0, 10)
            .unwrap();
        assert!(!ledger.is_registered(&D2));
        assert!(!ledger.withdrawal_queue().contains(&D2));
        assert!(ledger.removal_queue().is_empty());
        // The record survives, zeroed.
        assert!(ledger.destination_info(&D2).unwrap().is_drained());
    }

    #[test]
    fn drained_destination_removed_immediately() {
        let mut ledger = ledger();
        ledger.add_destinations(&[D3]).unwrap();
        ledger.remove_destinations(&[D3]).unwrap();
        assert!(!ledger.is_registered(&D3));
        assert!(ledger.removal_queue().is_empty());
    }

    #[test]
    fn shutdown_recalls_and_is_one_way() {
        let (mut ledger, mut venue) = funded();
        ledger.remove_destinations(&[D1]).unwrap();
        let recovered = ledger.shutdown(&mut venue, ShutdownStatus::Exploit).unwrap();
        assert_eq!(recovered, 600);
        assert_eq!(ledger.total_idle(), 1_000);
        assert_eq!(ledger.total_debt(), 0);
        assert!(ledger.removal_queue().is_empty());
        assert!(!ledger.is_registered(&D1));
        assert_eq!(ledger.status(), ShutdownStatus::Exploit);

        assert_eq!(
            ledger.shutdown(&mut venue, ShutdownStatus::Deprecated),
            Err(LedgerError::InvalidShutdownTransition {
                from: ShutdownStatus::Exploit,
                to: ShutdownStatus::Deprecated
            })
        );
        venue.fund_account(BOB, 10).unwrap();
        assert_eq!(
            ledger.deposit(&mut venue, BOB, BOB, 10),
            Err(LedgerError::VaultShutdown(ShutdownStatus::Exploit))
        );
        // Withdrawals stay open.
        ledger.withdraw(&mut venue, 1_000, ALICE, BOB).unwrap();
    }

    #[test]
    fn shutdown_to_active_rejected() {
        let (mut ledger, mut venue) = funded();
        assert!(matches!(
            ledger.shutdown(&mut venue, ShutdownStatus::Active),
            Err(LedgerError::InvalidShutdownTransition { .. })
        ));
    }

    #[test]
    fn destination_status_is_one_way() {
        let (mut ledger, _) = funded();
        ledger
            .set_destination_status(D1, ShutdownStatus::Deprecated)
            .unwrap();
        assert!(matches!(
            ledger.set_destination_status(D1, ShutdownStatus::Active),
            Err(LedgerError::InvalidShutdownTransition { .. })
        ));

        let params = RebalanceParams {
            destination_in: D1,
            token_in: D1,
            amount_in: 10,
            destination_out: VAULT,
            token_out: BASE,
            amount_out: 10,
        };
        assert_eq!(
            ledger.apply_rebalance(&params, 10, 10),
            Err(LedgerError::DestinationShutdown {
                destination: D1,
                status: ShutdownStatus::Deprecated
            })
        );
    }

    #[test]
    fn rebalance_out_of_destination_requires_debt() {
        let (mut ledger, _) = funded();
        let params = RebalanceParams {
            destination_in: VAULT,
            token_in: BASE,
            amount_in: 500,
            destination_out: D2,
            token_out: D2,
            amount_out: 500,
        };
        assert_eq!(
            ledger.apply_rebalance(&params, 500, 500),
            Err(LedgerError::InsufficientDebt {
                destination: D2,
                requested: 500,
                available: 200
            })
        );
    }

    #[test]
    fn rebalance_to_idle_scales_book_value() {
        let (mut ledger, _) = funded();
        let params = RebalanceParams {
            destination_in: VAULT,
            token_in: BASE,
            amount_in: 100,
            destination_out: D1,
            token_out: D1,
            amount_out: 100,
        };
        ledger.apply_rebalance(&params, 100, 100).unwrap();
        assert_eq!(ledger.destination_info(&D1).unwrap().last_reported_value, 300);
        assert_eq!(ledger.total_idle(), 500);
        assert_eq!(ledger.total_debt(), 500);
    }

    #[test]
    fn second_depositor_priced_at_nav() {
        let (mut ledger, mut venue) = funded();
        // D1 doubles in value.
        ledger
            .record_debt_report(&mut venue, D1, 400, 0, 800, 5)
            .unwrap();
        assert_eq!(ledger.nav_per_share().unwrap(), 14 * WAD / 10);

        venue.fund_account(BOB, 1_400).unwrap();
        let shares = ledger.deposit(&mut venue, BOB, BOB, 1_400).unwrap();
        assert_eq!(shares, 1_000);
    }

    #[test]
    fn snapshot_roundtrip() {
        let (ledger, _) = funded();
        let json = serde_json::to_string(&ledger).unwrap();
        let back: DebtLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ledger);
    }
}
