//! Integration tests for the vault glue: reporting rounds feeding NAV,
//! booked rebalances moving real venue balances, withdrawals and snapshots.

use autopool_contracts::strategy::{RejectReason, StrategyConfig, SummaryStats};
use autopool_contracts::{Autopool, AutopoolError, DebtReport, SnapshotError};
use autopool_protocol::config::{LAYOUT_VERSION, ONE_DAY_SECS, WAD};
use autopool_protocol::ledger::{
    LedgerConfig, LedgerError, MemoryVenue, RebalanceParams, VaultEvent, Venue,
};
use autopool_protocol::{Address, Classify, ErrorKind};

const VAULT: Address = Address::repeat_byte(0x1A);
const BASE: Address = Address::repeat_byte(0x1B);
const USER: Address = Address::repeat_byte(0x2C);
const D1: Address = Address::repeat_byte(0xE1);
const D2: Address = Address::repeat_byte(0xE2);

const T0: u64 = 1_700_000_000;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn autopool() -> Autopool {
    Autopool::new(
        LedgerConfig {
            vault: VAULT,
            base_asset: BASE,
        },
        StrategyConfig::default(),
    )
    .expect("autopool")
}

/// 1_000 deposited, 400 moved into D1 through a verified rebalance.
fn deployed() -> (Autopool, MemoryVenue) {
    let mut pool = autopool();
    let mut venue = MemoryVenue::new();
    venue.fund_account(USER, 1_000).unwrap();
    pool.deposit(&mut venue, USER, USER, 1_000).unwrap();
    pool.ledger_mut().add_destinations(&[D1, D2]).unwrap();

    let params = RebalanceParams {
        destination_in: D1,
        token_in: D1,
        amount_in: 400,
        destination_out: VAULT,
        token_out: BASE,
        amount_out: 400,
    };
    let stats = SummaryStats {
        destination: D1,
        safe_price_per_share: WAD,
        spot_price_per_share: WAD,
        composite_return_bps: 450,
    };
    venue.deploy(D1, 400, 400).unwrap();
    venue.set_exchange_rate(D1, WAD);
    pool.rebalance(&params, &stats, &SummaryStats::idle(VAULT), 400, 400, T0)
        .unwrap();
    pool.drain_events();
    (pool, venue)
}

fn report(destination: Address, underlying: u128, value: u128) -> DebtReport {
    DebtReport {
        destination,
        internal_debt_amount: underlying,
        external_debt_amount: 0,
        value,
    }
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

#[test]
fn reporting_round_samples_nav() {
    let (mut pool, mut venue) = deployed();
    venue.add_rewards(D1, 50).unwrap();

    let nav = pool
        .update_debt_reporting(&mut venue, &[report(D1, 400, 500)], T0 + ONE_DAY_SECS)
        .unwrap();

    // idle 600 + claimed 50, debt 500, supply 1_000
    assert_eq!(nav.idle, 650);
    assert_eq!(nav.debt, 500);
    assert_eq!(nav.nav_per_share, WAD * 115 / 100);
    assert_eq!(
        pool.strategy().nav_history().get_days_ago(0),
        Some(nav.nav_per_share)
    );
    assert_eq!(venue.base_asset_balance(), 650);

    let events = pool.drain_events();
    assert!(matches!(events.first(), Some(VaultEvent::DebtReported(r)) if r.amount_claimed == 50));
    assert!(matches!(events.last(), Some(VaultEvent::Nav { idle: 650, debt: 500, .. })));
}

#[test]
fn failed_round_leaves_vault_untouched() {
    let (mut pool, mut venue) = deployed();
    // D1's rewards are claimed before the stranger's report fails.
    venue.add_rewards(D1, 30).unwrap();
    let before = pool.clone();
    let venue_before = venue.clone();
    let stranger = Address::repeat_byte(0xEE);

    let err = pool
        .update_debt_reporting(
            &mut venue,
            &[report(D1, 400, 900), report(stranger, 1, 1)],
            T0 + ONE_DAY_SECS,
        )
        .unwrap_err();
    assert_eq!(err, AutopoolError::Ledger(LedgerError::NotRegistered(stranger)));
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(pool, before);
    assert_eq!(venue, venue_before);
    assert_eq!(venue.position(&D1).unwrap().pending_rewards, 30);
    assert_eq!(pool.strategy().nav_history().len(), 0);
}

#[test]
fn stale_round_keeps_books_but_skips_sample() {
    let (mut pool, mut venue) = deployed();
    let day = T0 + ONE_DAY_SECS;
    pool.update_debt_reporting(&mut venue, &[report(D1, 400, 420)], day)
        .unwrap();
    let nav = pool
        .update_debt_reporting(&mut venue, &[report(D1, 400, 440)], day)
        .unwrap();

    assert_eq!(nav.debt, 440);
    assert_eq!(pool.strategy().nav_history().len(), 1);
    assert_eq!(
        pool.strategy().nav_history().get_days_ago(0),
        Some(WAD * 102 / 100)
    );
}

// ---------------------------------------------------------------------------
// Rebalance and withdrawal
// ---------------------------------------------------------------------------

#[test]
fn rejected_rebalance_surfaces_reason() {
    let (mut pool, _) = deployed();
    let params = RebalanceParams {
        destination_in: D2,
        token_in: D2,
        amount_in: 100,
        destination_out: VAULT,
        token_out: BASE,
        amount_out: 100,
    };
    let stats = SummaryStats {
        destination: D2,
        safe_price_per_share: WAD,
        spot_price_per_share: WAD,
        composite_return_bps: 600,
    };
    let err = pool
        .rebalance(&params, &stats, &SummaryStats::idle(VAULT), 100, 100, T0 + 1)
        .unwrap_err();
    assert!(matches!(
        err,
        AutopoolError::RebalanceRejected(RejectReason::Cooldown { .. })
    ));
    assert!(err.to_string().starts_with("rebalance rejected: "));
}

#[test]
fn withdrawal_drains_idle_then_queue() {
    let (mut pool, mut venue) = deployed();
    let receipt = pool.withdraw(&mut venue, 800, USER, USER).unwrap();

    assert_eq!(receipt.assets, 800);
    assert_eq!(receipt.from_idle, 600);
    assert_eq!(receipt.pulls.len(), 1);
    assert_eq!(venue.account_balance(&USER), 800);

    let ledger = pool.ledger();
    assert_eq!(ledger.total_idle(), 0);
    assert_eq!(ledger.total_debt(), 200);
    assert_eq!(ledger.share_balance(&USER), 200);
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[test]
fn snapshot_restores_books_and_strategy() {
    let (mut pool, mut venue) = deployed();
    pool.update_debt_reporting(&mut venue, &[report(D1, 400, 410)], T0 + ONE_DAY_SECS)
        .unwrap();
    // Pending events are not part of a snapshot.
    pool.drain_events();

    let json = pool.to_json().unwrap();
    let restored = Autopool::from_json(&json).unwrap();
    assert_eq!(restored, pool);
    assert_eq!(restored.strategy().last_add_timestamp(&D1), Some(T0));
}

#[test]
fn snapshot_with_large_amounts() {
    let mut pool = autopool();
    let mut venue = MemoryVenue::new();
    let big = u64::MAX as u128 * 1_000;
    venue.fund_account(USER, big).unwrap();
    pool.deposit(&mut venue, USER, USER, big).unwrap();

    let restored = Autopool::from_json(&pool.to_json().unwrap()).unwrap();
    assert_eq!(restored.ledger().total_idle(), big);
}

#[test]
fn snapshot_from_another_layout_refused() {
    let pool = autopool();
    let mut value: serde_json::Value = serde_json::from_str(&pool.to_json().unwrap()).unwrap();
    value["layout_version"] = serde_json::Value::from(LAYOUT_VERSION + 1);

    let err = Autopool::from_json(&value.to_string()).unwrap_err();
    assert!(matches!(
        err,
        SnapshotError::UnsupportedLayout { found, expected }
            if found == LAYOUT_VERSION + 1 && expected == LAYOUT_VERSION
    ));

    let obj = value.as_object_mut().unwrap();
    obj.remove("layout_version");
    assert!(matches!(
        Autopool::from_json(&value.to_string()),
        Err(SnapshotError::Json(_))
    ));
}
