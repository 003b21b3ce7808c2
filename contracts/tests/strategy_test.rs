//! Integration tests for the rebalance strategy.
//!
//! Each test builds a funded vault, then walks one check of the rebalance
//! pipeline: what passes, what is refused, and which reason comes back.

use autopool_contracts::strategy::{
    AutopoolStrategy, RejectReason, StrategyConfig, SummaryStats,
};
use autopool_contracts::{Autopool, AutopoolError};
use autopool_protocol::config::{ONE_DAY_SECS, WAD};
use autopool_protocol::ledger::{LedgerConfig, MemoryVenue, RebalanceParams, ShutdownStatus};
use autopool_protocol::{Address, Classify, ErrorKind};

const VAULT: Address = Address::repeat_byte(0x0A);
const BASE: Address = Address::repeat_byte(0x0B);
const USER: Address = Address::repeat_byte(0x0C);
const D1: Address = Address::repeat_byte(0xD1);
const D2: Address = Address::repeat_byte(0xD2);
const D3: Address = Address::repeat_byte(0xD3);

const T0: u64 = 1_700_000_000;

/// A vault holding 10_000 idle with D1 and D2 registered.
fn vault() -> (Autopool, MemoryVenue) {
    let mut pool = Autopool::new(
        LedgerConfig {
            vault: VAULT,
            base_asset: BASE,
        },
        StrategyConfig::default(),
    )
    .expect("vault");
    let mut venue = MemoryVenue::new();
    venue.fund_account(USER, 10_000).unwrap();
    pool.deposit(&mut venue, USER, USER, 10_000).expect("deposit");
    pool.ledger_mut().add_destinations(&[D1, D2]).expect("register");
    (pool, venue)
}

fn stats(destination: Address, return_bps: i64) -> SummaryStats {
    SummaryStats {
        destination,
        safe_price_per_share: WAD,
        spot_price_per_share: WAD,
        composite_return_bps: return_bps,
    }
}

fn from_idle(destination: Address, amount: u128) -> RebalanceParams {
    RebalanceParams {
        destination_in: destination,
        token_in: destination,
        amount_in: amount,
        destination_out: VAULT,
        token_out: BASE,
        amount_out: amount,
    }
}

fn between(to: Address, from: Address, amount: u128) -> RebalanceParams {
    RebalanceParams {
        destination_in: to,
        token_in: to,
        amount_in: amount,
        destination_out: from,
        token_out: from,
        amount_out: amount,
    }
}

fn to_idle(from: Address, amount: u128) -> RebalanceParams {
    RebalanceParams {
        destination_in: VAULT,
        token_in: BASE,
        amount_in: amount,
        destination_out: from,
        token_out: from,
        amount_out: amount,
    }
}

fn rejection(pool: &Autopool, params: &RebalanceParams, i: SummaryStats, o: SummaryStats, now: u64) -> RejectReason {
    let verdict = pool.verify_rebalance(params, &i, &o, now);
    assert!(!verdict.accepted, "expected rejection");
    assert!(!verdict.reason_text().is_empty());
    verdict.reason.expect("reason")
}

// ---------------------------------------------------------------------------
// Acceptance and bookkeeping
// ---------------------------------------------------------------------------

#[test]
fn accepted_rebalance_is_booked_and_recorded() {
    let (mut pool, _) = vault();
    let params = from_idle(D1, 3_000);
    pool.rebalance(&params, &stats(D1, 500), &SummaryStats::idle(VAULT), 3_000, 3_000, T0)
        .unwrap();

    let ledger = pool.ledger();
    assert_eq!(ledger.destination_info(&D1).unwrap().last_reported_value, 3_000);
    assert_eq!(ledger.total_idle(), 7_000);
    assert_eq!(ledger.withdrawal_queue().as_slice(), &[D1]);
    assert_eq!(pool.strategy().last_rebalance_timestamp(), Some(T0));
    assert_eq!(pool.strategy().last_add_timestamp(&D1), Some(T0));
}

#[test]
fn cooldown_blocks_back_to_back_rebalances() {
    let (mut pool, _) = vault();
    pool.rebalance(&from_idle(D1, 1_000), &stats(D1, 500), &SummaryStats::idle(VAULT), 1_000, 1_000, T0)
        .unwrap();

    let err = pool
        .rebalance(&from_idle(D2, 1_000), &stats(D2, 500), &SummaryStats::idle(VAULT), 1_000, 1_000, T0 + 60)
        .unwrap_err();
    let interval = StrategyConfig::default().min_rebalance_interval_secs;
    assert_eq!(
        err,
        AutopoolError::RebalanceRejected(RejectReason::Cooldown {
            next_allowed: T0 + interval
        })
    );
    assert_eq!(err.kind(), ErrorKind::State);
    // Nothing booked.
    assert_eq!(pool.ledger().destination_info(&D2).unwrap().last_reported_value, 0);
}

#[test]
fn hold_period_then_release() {
    let (mut pool, _) = vault();
    pool.rebalance(&from_idle(D1, 2_000), &stats(D1, 500), &SummaryStats::idle(VAULT), 2_000, 2_000, T0)
        .unwrap();

    let config = StrategyConfig::default();
    let after_cooldown = T0 + config.min_rebalance_interval_secs;
    let params = between(D2, D1, 1_000);
    let reason = rejection(&pool, &params, stats(D2, 800), stats(D1, 500), after_cooldown);
    assert_eq!(
        reason,
        RejectReason::HoldPeriod {
            destination: D1,
            until: T0 + config.min_hold_period_secs
        }
    );

    let after_hold = T0 + config.min_hold_period_secs;
    pool.rebalance(&params, &stats(D2, 800), &stats(D1, 500), 1_000, 1_000, after_hold)
        .unwrap();
    assert_eq!(pool.ledger().destination_info(&D1).unwrap().last_reported_value, 1_000);
    assert_eq!(pool.ledger().destination_info(&D2).unwrap().last_reported_value, 1_000);
    assert_eq!(pool.ledger().withdrawal_queue().as_slice(), &[D1, D2]);
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

#[test]
fn mismatched_stats_rejected() {
    let (pool, _) = vault();
    let reason = rejection(&pool, &from_idle(D1, 100), stats(D2, 500), SummaryStats::idle(VAULT), T0);
    assert!(matches!(reason, RejectReason::InvalidParams(_)));
}

#[test]
fn unregistered_destination_rejected() {
    let (pool, _) = vault();
    let reason = rejection(&pool, &from_idle(D3, 100), stats(D3, 500), SummaryStats::idle(VAULT), T0);
    assert_eq!(reason, RejectReason::DestinationNotRegistered(D3));
}

#[test]
fn shut_down_destination_rejected() {
    let (mut pool, _) = vault();
    pool.ledger_mut()
        .set_destination_status(D1, ShutdownStatus::Exploit)
        .unwrap();
    let reason = rejection(&pool, &from_idle(D1, 100), stats(D1, 500), SummaryStats::idle(VAULT), T0);
    assert_eq!(
        reason,
        RejectReason::DestinationShutdown {
            destination: D1,
            status: ShutdownStatus::Exploit
        }
    );
}

#[test]
fn insufficient_idle_rejected() {
    let (pool, _) = vault();
    let reason = rejection(&pool, &from_idle(D1, 20_000), stats(D1, 500), SummaryStats::idle(VAULT), T0);
    assert_eq!(
        reason,
        RejectReason::InsufficientIdle {
            requested: 20_000,
            available: 10_000
        }
    );
}

#[test]
fn insufficient_destination_debt_rejected() {
    let (pool, _) = vault();
    let reason = rejection(&pool, &to_idle(D1, 100), SummaryStats::idle(VAULT), stats(D1, 500), T0);
    assert_eq!(
        reason,
        RejectReason::InsufficientDebt {
            destination: D1,
            requested: 100,
            available: 0
        }
    );
}

#[test]
fn price_deviation_rejected() {
    let (pool, _) = vault();
    let mut manipulated = stats(D1, 500);
    manipulated.spot_price_per_share = WAD + WAD / 100;
    let reason = rejection(&pool, &from_idle(D1, 1_000), manipulated, SummaryStats::idle(VAULT), T0);
    assert_eq!(
        reason,
        RejectReason::PriceDeviation {
            destination: D1,
            deviation_bps: 100,
            max_bps: 50
        }
    );
}

#[test]
fn slippage_rejected() {
    let (pool, _) = vault();
    let mut params = from_idle(D1, 3_000);
    params.amount_in = 2_900;
    let reason = rejection(&pool, &params, stats(D1, 500), SummaryStats::idle(VAULT), T0);
    assert_eq!(
        reason,
        RejectReason::Slippage {
            slippage_bps: 333,
            max_bps: 100
        }
    );
}

#[test]
fn allocation_cap_rejected() {
    let (pool, _) = vault();
    let reason = rejection(&pool, &from_idle(D1, 6_000), stats(D1, 500), SummaryStats::idle(VAULT), T0);
    assert_eq!(
        reason,
        RejectReason::AllocationCap {
            destination: D1,
            allocation_bps: 6_000,
            max_bps: 5_000
        }
    );
}

#[test]
fn insufficient_return_rejected() {
    let (pool, _) = vault();
    let reason = rejection(&pool, &from_idle(D1, 1_000), stats(D1, 10), SummaryStats::idle(VAULT), T0);
    assert_eq!(
        reason,
        RejectReason::InsufficientReturn {
            improvement_bps: 10,
            min_bps: 25
        }
    );
}

// ---------------------------------------------------------------------------
// Pause and shutdown
// ---------------------------------------------------------------------------

#[test]
fn nav_decay_pause_only_allows_idle() {
    let (mut pool, _) = vault();
    pool.rebalance(&from_idle(D1, 3_000), &stats(D1, 500), &SummaryStats::idle(VAULT), 3_000, 3_000, T0)
        .unwrap();

    let mut strategy = AutopoolStrategy::new(VAULT, StrategyConfig::default()).unwrap();
    for day in 1..=91u64 {
        strategy
            .nav_update(WAD - day as u128 * 1_000, T0 + day * ONE_DAY_SECS)
            .unwrap();
    }
    let now = T0 + 91 * ONE_DAY_SECS + 1;
    assert!(strategy.is_paused(now));

    let refused = strategy.verify_rebalance(
        pool.ledger(),
        &from_idle(D2, 1_000),
        &stats(D2, 900),
        &SummaryStats::idle(VAULT),
        now,
    );
    assert!(matches!(refused.reason, Some(RejectReason::NavDecayPause { .. })));

    let allowed = strategy.verify_rebalance(
        pool.ledger(),
        &to_idle(D1, 1_000),
        &SummaryStats::idle(VAULT),
        &stats(D1, 500),
        now,
    );
    assert!(allowed.accepted, "{}", allowed.reason_text());
}

#[test]
fn shutdown_vault_only_rebalances_to_idle() {
    let (mut pool, mut venue) = vault();
    pool.shutdown(&mut venue, ShutdownStatus::Deprecated).unwrap();

    let reason = rejection(&pool, &from_idle(D1, 100), stats(D1, 500), SummaryStats::idle(VAULT), T0);
    assert_eq!(reason, RejectReason::VaultShutdown(ShutdownStatus::Deprecated));
}
