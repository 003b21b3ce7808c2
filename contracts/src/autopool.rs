//! # Autopool
//!
//! The vault as a whole: a [`DebtLedger`] for the books and an
//! [`AutopoolStrategy`] for the rebalance checks and NAV history. This is
//! where a reporting round turns into a NAV sample, and where an accepted
//! rebalance is booked and then recorded for cooldowns.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use autopool_protocol::ledger::{
    DebtLedger, LedgerConfig, LedgerError, NavReport, RebalanceParams, ShutdownStatus,
    VaultEvent, Venue, WithdrawReceipt,
};
use autopool_protocol::config::LAYOUT_VERSION;
use autopool_protocol::{Address, Classify, ErrorKind};

use crate::strategy::{
    AutopoolStrategy, RebalanceVerdict, RejectReason, StrategyConfig, StrategyError, SummaryStats,
};

/// Errors raised by vault-level operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AutopoolError {
    /// The ledger refused the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The strategy refused the operation.
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// The strategy rejected a rebalance.
    #[error("rebalance rejected: {0}")]
    RebalanceRejected(RejectReason),
}

impl Classify for AutopoolError {
    fn kind(&self) -> ErrorKind {
        match self {
            AutopoolError::Ledger(e) => e.kind(),
            AutopoolError::Strategy(e) => e.kind(),
            AutopoolError::RebalanceRejected(_) => ErrorKind::State,
        }
    }
}

/// Errors raised when restoring a vault snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot is not valid JSON for a vault.
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),

    /// The snapshot was written with a different layout.
    #[error("snapshot layout v{found} is not supported (expected v{expected})")]
    UnsupportedLayout {
        /// Layout recorded in the snapshot.
        found: u32,
        /// Layout this build reads and writes.
        expected: u32,
    },
}

/// One destination's figures in a reporting round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtReport {
    /// Reporting destination.
    pub destination: Address,
    /// Underlying held directly.
    pub internal_debt_amount: u128,
    /// Underlying staked externally.
    pub external_debt_amount: u128,
    /// Base-asset value of the position.
    pub value: u128,
}

/// A vault: ledger plus strategy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autopool {
    layout_version: u32,
    ledger: DebtLedger,
    strategy: AutopoolStrategy,
}

impl Autopool {
    /// Creates an empty, active vault.
    pub fn new(config: LedgerConfig, strategy: StrategyConfig) -> Result<Self, AutopoolError> {
        let ledger = DebtLedger::new(config)?;
        let strategy = AutopoolStrategy::new(config.vault, strategy)?;
        Ok(Self {
            layout_version: LAYOUT_VERSION,
            ledger,
            strategy,
        })
    }

    /// Restores a vault from a JSON snapshot written with the current
    /// [`LAYOUT_VERSION`].
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let vault: Autopool = serde_json::from_str(json)?;
        if vault.layout_version != LAYOUT_VERSION {
            return Err(SnapshotError::UnsupportedLayout {
                found: vault.layout_version,
                expected: LAYOUT_VERSION,
            });
        }
        Ok(vault)
    }

    /// Snapshot layout this vault was created or restored with.
    pub fn layout_version(&self) -> u32 {
        self.layout_version
    }

    /// Serializes the vault to a pretty-printed JSON snapshot.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Applies a reporting round, finalizes it and samples the resulting NAV
    /// into the strategy. Nothing is kept unless every step succeeds: on
    /// failure the vault is unchanged and rewards already claimed in the
    /// round are rolled back at the venue.
    pub fn update_debt_reporting<V: Venue>(
        &mut self,
        venue: &mut V,
        reports: &[DebtReport],
        now: u64,
    ) -> Result<NavReport, AutopoolError> {
        let checkpoint = venue.checkpoint();
        let mut staged = self.clone();
        match staged.run_reporting_round(venue, reports, now) {
            Ok(nav) => {
                *self = staged;
                Ok(nav)
            }
            Err(err) => {
                venue.rollback(checkpoint);
                Err(err)
            }
        }
    }

    fn run_reporting_round<V: Venue>(
        &mut self,
        venue: &mut V,
        reports: &[DebtReport],
        now: u64,
    ) -> Result<NavReport, AutopoolError> {
        for report in reports {
            self.ledger.record_debt_report(
                venue,
                report.destination,
                report.internal_debt_amount,
                report.external_debt_amount,
                report.value,
                now,
            )?;
        }
        let nav = self.ledger.finalize_reporting(now)?;
        let sampled = self.strategy.nav_update(nav.nav_per_share, now)?;
        info!(
            destinations = reports.len(),
            nav = nav.nav_per_share,
            sampled,
            "reporting round complete"
        );
        Ok(nav)
    }

    /// Checks a rebalance without booking it.
    pub fn verify_rebalance(
        &self,
        params: &RebalanceParams,
        in_stats: &SummaryStats,
        out_stats: &SummaryStats,
        now: u64,
    ) -> RebalanceVerdict {
        self.strategy
            .verify_rebalance(&self.ledger, params, in_stats, out_stats, now)
    }

    /// Verifies, books and records an executed rebalance.
    ///
    /// `value_in` and `value_out` are the base-asset values the executor
    /// observed for each side.
    pub fn rebalance(
        &mut self,
        params: &RebalanceParams,
        in_stats: &SummaryStats,
        out_stats: &SummaryStats,
        value_in: u128,
        value_out: u128,
        now: u64,
    ) -> Result<(), AutopoolError> {
        let verdict = self.verify_rebalance(params, in_stats, out_stats, now);
        if let Some(reason) = verdict.reason {
            return Err(AutopoolError::RebalanceRejected(reason));
        }
        self.ledger.apply_rebalance(params, value_in, value_out)?;
        self.strategy.rebalance_successfully_executed(params, now);
        Ok(())
    }

    /// Deposits base asset for shares. Returns shares minted.
    pub fn deposit<V: Venue>(
        &mut self,
        venue: &mut V,
        sender: Address,
        receiver: Address,
        assets: u128,
    ) -> Result<u128, AutopoolError> {
        Ok(self.ledger.deposit(venue, sender, receiver, assets)?)
    }

    /// Redeems shares through idle and the withdrawal queue.
    pub fn withdraw<V: Venue>(
        &mut self,
        venue: &mut V,
        shares: u128,
        owner: Address,
        receiver: Address,
    ) -> Result<WithdrawReceipt, AutopoolError> {
        Ok(self.ledger.withdraw(venue, shares, owner, receiver)?)
    }

    /// Shuts the vault down. Returns the base asset recalled.
    pub fn shutdown<V: Venue>(
        &mut self,
        venue: &mut V,
        reason: ShutdownStatus,
    ) -> Result<u128, AutopoolError> {
        Ok(self.ledger.shutdown(venue, reason)?)
    }

    /// The books.
    pub fn ledger(&self) -> &DebtLedger {
        &self.ledger
    }

    /// Mutable books, for destination and queue management.
    pub fn ledger_mut(&mut self) -> &mut DebtLedger {
        &mut self.ledger
    }

    /// The strategy.
    pub fn strategy(&self) -> &AutopoolStrategy {
        &self.strategy
    }

    /// Takes every event logged since the last drain.
    pub fn drain_events(&mut self) -> Vec<VaultEvent> {
        self.ledger.drain_events()
    }
}
