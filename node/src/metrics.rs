//! # Prometheus Metrics
//!
//! Renders a vault snapshot in the Prometheus text exposition format, for a
//! node-exporter textfile collector or a push gateway.
//!
//! Metrics live in a dedicated [`prometheus::Registry`] so they never mix
//! with a default global registry.

use anyhow::{Context, Result};
use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, Opts, Registry, TextEncoder};

use autopool_contracts::Autopool;
use autopool_protocol::config::WAD;
use autopool_protocol::ledger::ShutdownStatus;

/// Gauges describing one vault.
pub struct VaultMetrics {
    registry: Registry,
    pub total_idle: Gauge,
    pub total_debt: Gauge,
    pub total_assets: Gauge,
    pub total_supply: Gauge,
    /// NAV per share as a plain ratio (1.0 = par).
    pub nav_per_share: Gauge,
    pub withdrawal_queue_length: IntGauge,
    pub registered_destinations: IntGauge,
    pub nav_samples: IntGauge,
    /// 1 while a NAV-decay pause is in effect.
    pub rebalance_paused: IntGauge,
    /// 0 = active, 1 = deprecated, 2 = exploit.
    pub vault_status: IntGauge,
    /// Last reported base-asset value per destination.
    pub destination_value: GaugeVec,
}

impl VaultMetrics {
    /// Creates and registers every gauge under `namespace`.
    pub fn new(namespace: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some(namespace.to_string()), None)?;

        let gauge = |name: &str, help: &str| -> Result<Gauge, prometheus::Error> {
            let g = Gauge::new(name, help)?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };
        let int_gauge = |name: &str, help: &str| -> Result<IntGauge, prometheus::Error> {
            let g = IntGauge::new(name, help)?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };

        let total_idle = gauge("total_idle", "Base asset held idle by the vault")?;
        let total_debt = gauge("total_debt", "Base-asset value deployed to destinations")?;
        let total_assets = gauge("total_assets", "Idle plus deployed value")?;
        let total_supply = gauge("total_supply", "Outstanding vault shares")?;
        let nav_per_share = gauge("nav_per_share", "Total assets per share")?;
        let withdrawal_queue_length =
            int_gauge("withdrawal_queue_length", "Destinations in the withdrawal queue")?;
        let registered_destinations =
            int_gauge("registered_destinations", "Destinations registered with the vault")?;
        let nav_samples = int_gauge("nav_samples", "NAV samples held in the history ring")?;
        let rebalance_paused =
            int_gauge("rebalance_paused", "Whether NAV decay has paused rebalances")?;
        let vault_status = int_gauge("vault_status", "Vault shutdown status")?;

        let destination_value = GaugeVec::new(
            Opts::new(
                "destination_value",
                "Last reported base-asset value of a destination",
            ),
            &["destination"],
        )?;
        registry.register(Box::new(destination_value.clone()))?;

        Ok(Self {
            registry,
            total_idle,
            total_debt,
            total_assets,
            total_supply,
            nav_per_share,
            withdrawal_queue_length,
            registered_destinations,
            nav_samples,
            rebalance_paused,
            vault_status,
            destination_value,
        })
    }

    /// Sets every gauge from the vault's current books.
    ///
    /// Amounts are exported as `f64` and lose precision past 2^53 raw units.
    pub fn observe(&self, vault: &Autopool, now: u64) -> Result<()> {
        let ledger = vault.ledger();
        let total_assets = ledger.total_assets().context("total assets")?;
        let nav = ledger.nav_per_share().context("nav per share")?;

        self.total_idle.set(ledger.total_idle() as f64);
        self.total_debt.set(ledger.total_debt() as f64);
        self.total_assets.set(total_assets as f64);
        self.total_supply.set(ledger.total_supply() as f64);
        self.nav_per_share.set(nav as f64 / WAD as f64);
        self.withdrawal_queue_length
            .set(ledger.withdrawal_queue().len() as i64);
        self.nav_samples
            .set(vault.strategy().nav_history().len() as i64);
        self.rebalance_paused
            .set(i64::from(vault.strategy().is_paused(now)));
        self.vault_status.set(status_code(ledger.status()));

        let mut registered = 0;
        for destination in ledger.registered_destinations() {
            registered += 1;
            let value = ledger
                .destination_info(destination)
                .map_or(0, |info| info.last_reported_value);
            let label = destination.to_hex();
            self.destination_value
                .with_label_values(&[label.as_str()])
                .set(value as f64);
        }
        self.registered_destinations.set(registered);
        Ok(())
    }

    /// Encodes all registered metrics into the text exposition format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode metrics")?;
        String::from_utf8(buffer).context("metrics output is not utf-8")
    }
}

fn status_code(status: ShutdownStatus) -> i64 {
    match status {
        ShutdownStatus::Active => 0,
        ShutdownStatus::Deprecated => 1,
        ShutdownStatus::Exploit => 2,
    }
}
