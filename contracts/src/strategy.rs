//! # Rebalance Strategy
//!
//! Decides whether a proposed rebalance may go through. The strategy never
//! picks destinations itself; a solver proposes, the strategy checks.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. Parameter sanity.
//! 2. Vault shutdown (only rebalances back to idle).
//! 3. Destination-in registered and active.
//! 4. Destination-out registered and holding enough (or enough idle).
//! 5. NAV-decay pause (only rebalances back to idle).
//! 6. Global cooldown since the last rebalance.
//! 7. Hold period on destination-out.
//! 8. Spot vs safe price deviation on every non-idle side.
//! 9. Slippage of value in vs value out at safe prices.
//! 10. Post-rebalance allocation cap on destination-in.
//! 11. Return improvement (not required when moving to idle).
//!
//! The strategy also owns the vault's [`NavHistory`]. A sample that is
//! below the samples 30, 60 and 90 entries back pauses non-idle rebalances
//! for `pause_rebalance_period_secs`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use autopool_protocol::config::{BPS_DENOMINATOR, ONE_DAY_SECS, WAD};
use autopool_protocol::ledger::{DebtLedger, RebalanceParams, ShutdownStatus};
use autopool_protocol::math::{ratio_bps, wad_mul};
use autopool_protocol::nav::{NavError, NavHistory};
use autopool_protocol::{Address, Classify, ErrorKind};

/// Sample distances compared by the NAV-decay check.
pub const NAV_DECAY_LOOKBACKS: [usize; 3] = [30, 60, 90];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by strategy operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// A configuration value is out of range.
    #[error("invalid strategy config: {0}")]
    InvalidConfig(String),

    /// The NAV history refused a sample.
    #[error(transparent)]
    Nav(#[from] NavError),
}

impl Classify for StrategyError {
    fn kind(&self) -> ErrorKind {
        match self {
            StrategyError::InvalidConfig(_) => ErrorKind::Validation,
            StrategyError::Nav(e) => e.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables of the rebalance checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Minimum seconds between two rebalances.
    pub min_rebalance_interval_secs: u64,
    /// Minimum seconds a destination keeps funds it received before they
    /// can be moved out again.
    pub min_hold_period_secs: u64,
    /// How long a NAV-decay signal pauses non-idle rebalances.
    pub pause_rebalance_period_secs: u64,
    /// Maximum spot vs safe price deviation, in basis points.
    pub max_price_deviation_bps: u128,
    /// Maximum loss of value in vs value out, in basis points.
    pub max_slippage_bps: u128,
    /// Maximum share of total assets one destination may hold afterwards.
    pub max_destination_allocation_bps: u128,
    /// Minimum composite return gain of destination-in over
    /// destination-out, in basis points.
    pub min_return_improvement_bps: i64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_rebalance_interval_secs: 6 * 60 * 60,
            min_hold_period_secs: 2 * ONE_DAY_SECS,
            pause_rebalance_period_secs: 90 * ONE_DAY_SECS,
            max_price_deviation_bps: 50,
            max_slippage_bps: 100,
            max_destination_allocation_bps: 5_000,
            min_return_improvement_bps: 25,
        }
    }
}

impl StrategyConfig {
    /// Checks every field against its legal range.
    pub fn validate(&self) -> Result<(), StrategyError> {
        let bps_fields = [
            ("max_price_deviation_bps", self.max_price_deviation_bps),
            ("max_slippage_bps", self.max_slippage_bps),
            (
                "max_destination_allocation_bps",
                self.max_destination_allocation_bps,
            ),
        ];
        for (name, value) in bps_fields {
            if value > BPS_DENOMINATOR {
                return Err(StrategyError::InvalidConfig(format!(
                    "{name} = {value} exceeds {BPS_DENOMINATOR}"
                )));
            }
        }
        if self.max_destination_allocation_bps == 0 {
            return Err(StrategyError::InvalidConfig(
                "max_destination_allocation_bps must be positive".into(),
            ));
        }
        if self.min_return_improvement_bps.unsigned_abs() as u128 > BPS_DENOMINATOR {
            return Err(StrategyError::InvalidConfig(format!(
                "min_return_improvement_bps = {} out of range",
                self.min_return_improvement_bps
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Inputs and verdicts
// ---------------------------------------------------------------------------

/// Price and return figures for one side of a rebalance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStats {
    /// The destination these figures describe (the vault itself for idle).
    pub destination: Address,
    /// Manipulation-resistant base-asset price per unit of underlying,
    /// WAD-scaled.
    pub safe_price_per_share: u128,
    /// Current pool-implied price per unit of underlying, WAD-scaled.
    pub spot_price_per_share: u128,
    /// Expected annualized return, in basis points.
    pub composite_return_bps: i64,
}

impl SummaryStats {
    /// Stats for idle base asset: priced at par, earning nothing.
    pub fn idle(vault: Address) -> Self {
        Self {
            destination: vault,
            safe_price_per_share: WAD,
            spot_price_per_share: WAD,
            composite_return_bps: 0,
        }
    }
}

/// Why a rebalance was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Parameters or stats are malformed.
    #[error("invalid rebalance parameters: {0}")]
    InvalidParams(String),

    /// The vault is shut down and the rebalance does not go to idle.
    #[error("vault is shut down ({0}); only rebalances to idle are allowed")]
    VaultShutdown(ShutdownStatus),

    /// A destination is not registered with the vault.
    #[error("destination {0} is not registered")]
    DestinationNotRegistered(Address),

    /// Destination-in is shut down.
    #[error("destination {destination} is shut down ({status})")]
    DestinationShutdown {
        /// The destination.
        destination: Address,
        /// Its status.
        status: ShutdownStatus,
    },

    /// Destination-out holds less underlying than requested.
    #[error("destination {destination} holds {available} underlying, {requested} requested")]
    InsufficientDebt {
        /// The destination.
        destination: Address,
        /// Underlying requested.
        requested: u128,
        /// Underlying on the books.
        available: u128,
    },

    /// Idle holds less base asset than requested.
    #[error("idle holds {available}, {requested} requested")]
    InsufficientIdle {
        /// Base asset requested.
        requested: u128,
        /// Idle base asset.
        available: u128,
    },

    /// NAV decay paused non-idle rebalances.
    #[error("rebalances paused after nav decay until {until}")]
    NavDecayPause {
        /// Epoch seconds the pause ends at.
        until: u64,
    },

    /// The previous rebalance was too recent.
    #[error("rebalance cooldown active until {next_allowed}")]
    Cooldown {
        /// Earliest epoch second for the next rebalance.
        next_allowed: u64,
    },

    /// Destination-out received funds too recently.
    #[error("destination {destination} is in its hold period until {until}")]
    HoldPeriod {
        /// The destination.
        destination: Address,
        /// Epoch seconds the hold ends at.
        until: u64,
    },

    /// Spot and safe prices disagree by too much.
    #[error("price deviation for {destination} is {deviation_bps} bps (max {max_bps})")]
    PriceDeviation {
        /// The destination.
        destination: Address,
        /// Observed deviation.
        deviation_bps: u128,
        /// Configured ceiling.
        max_bps: u128,
    },

    /// Value in falls short of value out by too much.
    #[error("slippage {slippage_bps} bps exceeds max {max_bps}")]
    Slippage {
        /// Observed slippage.
        slippage_bps: u128,
        /// Configured ceiling.
        max_bps: u128,
    },

    /// Destination-in would hold too large a share of total assets.
    #[error("destination {destination} would hold {allocation_bps} bps of assets (max {max_bps})")]
    AllocationCap {
        /// The destination.
        destination: Address,
        /// Allocation afterwards.
        allocation_bps: u128,
        /// Configured ceiling.
        max_bps: u128,
    },

    /// Destination-in does not pay enough more than destination-out.
    #[error("return improvement {improvement_bps} bps below min {min_bps}")]
    InsufficientReturn {
        /// In minus out.
        improvement_bps: i64,
        /// Configured floor.
        min_bps: i64,
    },
}

/// Outcome of [`AutopoolStrategy::verify_rebalance`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceVerdict {
    /// Whether the rebalance may proceed.
    pub accepted: bool,
    /// Why not, when refused.
    pub reason: Option<RejectReason>,
}

impl RebalanceVerdict {
    fn accept() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    fn reject(reason: RejectReason) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
        }
    }

    /// Human-readable reason; empty when accepted.
    pub fn reason_text(&self) -> String {
        self.reason
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// AutopoolStrategy
// ---------------------------------------------------------------------------

/// Rebalance checks plus the cooldown and NAV state they depend on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutopoolStrategy {
    vault: Address,
    config: StrategyConfig,
    nav_history: NavHistory,
    last_paused_timestamp: Option<u64>,
    last_rebalance_timestamp: Option<u64>,
    last_add_timestamp: BTreeMap<Address, u64>,
}

impl AutopoolStrategy {
    /// Creates a strategy for `vault`.
    pub fn new(vault: Address, config: StrategyConfig) -> Result<Self, StrategyError> {
        config.validate()?;
        Ok(Self {
            vault,
            config,
            nav_history: NavHistory::new(),
            last_paused_timestamp: None,
            last_rebalance_timestamp: None,
            last_add_timestamp: BTreeMap::new(),
        })
    }

    /// Runs every check against a proposed rebalance.
    ///
    /// `in_stats` and `out_stats` describe the destination receiving and the
    /// destination giving up funds. Use [`SummaryStats::idle`] for idle.
    pub fn verify_rebalance(
        &self,
        ledger: &DebtLedger,
        params: &RebalanceParams,
        in_stats: &SummaryStats,
        out_stats: &SummaryStats,
        now: u64,
    ) -> RebalanceVerdict {
        match self.check(ledger, params, in_stats, out_stats, now) {
            Ok(()) => {
                debug!(
                    destination_in = %params.destination_in,
                    destination_out = %params.destination_out,
                    "rebalance accepted"
                );
                RebalanceVerdict::accept()
            }
            Err(reason) => {
                info!(
                    destination_in = %params.destination_in,
                    destination_out = %params.destination_out,
                    %reason,
                    "rebalance rejected"
                );
                RebalanceVerdict::reject(reason)
            }
        }
    }

    fn check(
        &self,
        ledger: &DebtLedger,
        params: &RebalanceParams,
        in_stats: &SummaryStats,
        out_stats: &SummaryStats,
        now: u64,
    ) -> Result<(), RejectReason> {
        let to_idle = params.is_to_idle(self.vault);
        let from_idle = params.is_from_idle(self.vault);

        // 1. Parameter sanity.
        check_params(params, in_stats, out_stats)?;

        // 2. Vault shutdown.
        let vault_status = ledger.status();
        if !vault_status.is_active() && !to_idle {
            return Err(RejectReason::VaultShutdown(vault_status));
        }

        // 3. Destination-in.
        if !to_idle {
            let destination = params.destination_in;
            if !ledger.is_registered(&destination) {
                return Err(RejectReason::DestinationNotRegistered(destination));
            }
            let status = ledger.destination_status(&destination);
            if !status.is_active() {
                return Err(RejectReason::DestinationShutdown {
                    destination,
                    status,
                });
            }
        }

        // 4. Destination-out.
        let out_status = if from_idle {
            if params.amount_out > ledger.total_idle() {
                return Err(RejectReason::InsufficientIdle {
                    requested: params.amount_out,
                    available: ledger.total_idle(),
                });
            }
            vault_status
        } else {
            let destination = params.destination_out;
            if !ledger.is_registered(&destination) {
                return Err(RejectReason::DestinationNotRegistered(destination));
            }
            let available = ledger
                .destination_info(&destination)
                .and_then(|info| info.underlying())
                .unwrap_or(0);
            if params.amount_out > available {
                return Err(RejectReason::InsufficientDebt {
                    destination,
                    requested: params.amount_out,
                    available,
                });
            }
            ledger.destination_status(&destination)
        };

        // 5. NAV-decay pause.
        if !to_idle {
            if let Some(until) = self.paused_until(now) {
                return Err(RejectReason::NavDecayPause { until });
            }
        }

        // 6. Global cooldown.
        if let Some(last) = self.last_rebalance_timestamp {
            let next_allowed = last.saturating_add(self.config.min_rebalance_interval_secs);
            if now < next_allowed {
                return Err(RejectReason::Cooldown { next_allowed });
            }
        }

        // 7. Hold period. Leaving a shut-down destination or vault is
        //    never held back.
        if !from_idle && out_status.is_active() && vault_status.is_active() {
            if let Some(added) = self.last_add_timestamp.get(&params.destination_out) {
                let until = added.saturating_add(self.config.min_hold_period_secs);
                if now < until {
                    return Err(RejectReason::HoldPeriod {
                        destination: params.destination_out,
                        until,
                    });
                }
            }
        }

        // 8. Price deviation.
        if !to_idle {
            self.check_deviation(in_stats)?;
        }
        if !from_idle {
            self.check_deviation(out_stats)?;
        }

        // 9. Slippage.
        let value_in = value_at(params.amount_in, in_stats.safe_price_per_share)?;
        let value_out = value_at(params.amount_out, out_stats.safe_price_per_share)?;
        if value_out == 0 {
            return Err(RejectReason::InvalidParams("value out is zero".into()));
        }
        if value_in < value_out {
            let slippage_bps = bps(value_out - value_in, value_out)?;
            if slippage_bps > self.config.max_slippage_bps {
                return Err(RejectReason::Slippage {
                    slippage_bps,
                    max_bps: self.config.max_slippage_bps,
                });
            }
        }

        if to_idle {
            return Ok(());
        }

        // 10. Allocation cap.
        let current = ledger
            .destination_info(&params.destination_in)
            .map_or(0, |info| info.last_reported_value);
        let total_assets = ledger
            .total_assets()
            .map_err(|e| RejectReason::InvalidParams(e.to_string()))?;
        let post_destination = current.saturating_add(value_in);
        let post_total = total_assets
            .saturating_sub(value_out)
            .saturating_add(value_in);
        if post_total > 0 {
            let allocation_bps = bps(post_destination, post_total)?;
            if allocation_bps > self.config.max_destination_allocation_bps {
                return Err(RejectReason::AllocationCap {
                    destination: params.destination_in,
                    allocation_bps,
                    max_bps: self.config.max_destination_allocation_bps,
                });
            }
        }

        // 11. Return improvement.
        let improvement_bps = in_stats
            .composite_return_bps
            .saturating_sub(out_stats.composite_return_bps);
        if improvement_bps < self.config.min_return_improvement_bps {
            return Err(RejectReason::InsufficientReturn {
                improvement_bps,
                min_bps: self.config.min_return_improvement_bps,
            });
        }

        Ok(())
    }

    fn check_deviation(&self, stats: &SummaryStats) -> Result<(), RejectReason> {
        if stats.safe_price_per_share == 0 {
            return Err(RejectReason::InvalidParams(format!(
                "zero safe price for {}",
                stats.destination
            )));
        }
        let deviation_bps = bps(
            stats
                .spot_price_per_share
                .abs_diff(stats.safe_price_per_share),
            stats.safe_price_per_share,
        )?;
        if deviation_bps > self.config.max_price_deviation_bps {
            return Err(RejectReason::PriceDeviation {
                destination: stats.destination,
                deviation_bps,
                max_bps: self.config.max_price_deviation_bps,
            });
        }
        Ok(())
    }

    /// Records a NAV-per-share sample and pauses non-idle rebalances when
    /// NAV has decayed against every lookback.
    ///
    /// Returns whether the sample was accepted; stale timestamps are ignored.
    pub fn nav_update(&mut self, nav_per_share: u128, now: u64) -> Result<bool, StrategyError> {
        if !self.nav_history.insert(nav_per_share, now)? {
            return Ok(false);
        }

        let decayed = NAV_DECAY_LOOKBACKS.iter().all(|&n| {
            self.nav_history
                .get_days_ago(n)
                .is_some_and(|past| nav_per_share < past)
        });
        if decayed {
            self.last_paused_timestamp = Some(now);
            warn!(
                nav_per_share,
                until = now.saturating_add(self.config.pause_rebalance_period_secs),
                "nav decay detected, pausing rebalances"
            );
        }
        Ok(true)
    }

    /// Post-commit hook once an accepted rebalance has been booked.
    pub fn rebalance_successfully_executed(&mut self, params: &RebalanceParams, now: u64) {
        self.last_rebalance_timestamp = Some(now);
        if !params.is_to_idle(self.vault) {
            self.last_add_timestamp.insert(params.destination_in, now);
        }
        debug!(destination_in = %params.destination_in, now, "rebalance recorded");
    }

    fn paused_until(&self, now: u64) -> Option<u64> {
        let paused = self.last_paused_timestamp?;
        let until = paused.saturating_add(self.config.pause_rebalance_period_secs);
        (now < until).then_some(until)
    }

    /// Whether a NAV-decay pause is in effect at `now`.
    pub fn is_paused(&self, now: u64) -> bool {
        self.paused_until(now).is_some()
    }

    /// The vault this strategy serves.
    pub fn vault(&self) -> Address {
        self.vault
    }

    /// Active configuration.
    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// NAV samples recorded so far.
    pub fn nav_history(&self) -> &NavHistory {
        &self.nav_history
    }

    /// When the last pause started.
    pub fn last_paused_timestamp(&self) -> Option<u64> {
        self.last_paused_timestamp
    }

    /// When the last rebalance was booked.
    pub fn last_rebalance_timestamp(&self) -> Option<u64> {
        self.last_rebalance_timestamp
    }

    /// When `destination` last received funds.
    pub fn last_add_timestamp(&self, destination: &Address) -> Option<u64> {
        self.last_add_timestamp.get(destination).copied()
    }
}

fn check_params(
    params: &RebalanceParams,
    in_stats: &SummaryStats,
    out_stats: &SummaryStats,
) -> Result<(), RejectReason> {
    let invalid = |msg: &str| Err(RejectReason::InvalidParams(msg.to_string()));

    if params.destination_in.is_zero() || params.destination_out.is_zero() {
        return invalid("zero destination");
    }
    if params.token_in.is_zero() || params.token_out.is_zero() {
        return invalid("zero token");
    }
    if params.amount_in == 0 || params.amount_out == 0 {
        return invalid("zero amount");
    }
    if params.destination_in == params.destination_out {
        return invalid("destinations must differ");
    }
    if in_stats.destination != params.destination_in {
        return invalid("in stats describe another destination");
    }
    if out_stats.destination != params.destination_out {
        return invalid("out stats describe another destination");
    }
    Ok(())
}

/// Base-asset value of `amount` underlying at a WAD-scaled price.
fn value_at(amount: u128, price: u128) -> Result<u128, RejectReason> {
    wad_mul(amount, price).ok_or_else(|| RejectReason::InvalidParams("value overflow".into()))
}

fn bps(part: u128, whole: u128) -> Result<u128, RejectReason> {
    ratio_bps(part, whole).ok_or_else(|| RejectReason::InvalidParams("ratio overflow".into()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
