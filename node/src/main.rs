// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Autopool Operator Node
//!
//! Entry point for the `autopool-node` binary. Loads settings, initializes
//! logging and dispatches one subcommand:
//!
//! - `init`: write a fresh vault snapshot
//! - `inspect`: summarize a snapshot
//! - `verify`: check a proposed rebalance against a snapshot
//! - `price`: spot or safe-price inputs for a pool snapshot
//! - `metrics`: Prometheus text for a snapshot
//! - `version`: print build version information

mod cli;
mod logging;
mod metrics;
mod settings;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;

use autopool_contracts::{Autopool, SummaryStats};
use autopool_protocol::config::{LAYOUT_VERSION, WAD, WAD_DECIMALS};
use autopool_protocol::ledger::{LedgerConfig, RebalanceParams, ShutdownStatus};
use autopool_protocol::pricing::{
    get_safe_spot_price_info, get_spot_price, LiquidityPool, Pool, ReserveItemInfo,
};
use autopool_protocol::Address;

use cli::{AutopoolNodeCli, Commands};
use logging::LogFormat;
use metrics::VaultMetrics;
use settings::NodeSettings;

fn main() -> Result<()> {
    let cli = AutopoolNodeCli::parse();
    let settings = NodeSettings::load(cli.config.as_deref())?;

    let format = cli
        .log_format
        .as_deref()
        .map(LogFormat::from_str_lossy)
        .unwrap_or(settings.log.format);
    logging::init_logging(&settings.log.level, format);

    match cli.command {
        Commands::Init(args) => init_vault(args, &settings),
        Commands::Inspect(args) => inspect(args),
        Commands::Verify(args) => verify(args),
        Commands::Price(args) => price(args),
        Commands::Metrics(args) => render_metrics(args, &settings),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Creates an empty vault with the configured strategy and writes it out.
fn init_vault(args: cli::InitArgs, settings: &NodeSettings) -> Result<()> {
    if args.output.exists() && !args.force {
        bail!(
            "{} already exists, pass --force to overwrite",
            args.output.display()
        );
    }

    let mut vault = Autopool::new(
        LedgerConfig {
            vault: args.vault,
            base_asset: args.base_asset,
        },
        settings.strategy.clone(),
    )
    .context("failed to create vault")?;
    if !args.destinations.is_empty() {
        vault
            .ledger_mut()
            .add_destinations(&args.destinations)
            .context("failed to register destinations")?;
    }
    vault.drain_events();
    write_snapshot(&vault, &args.output)?;

    tracing::info!(
        vault = %args.vault,
        destinations = args.destinations.len(),
        path = %args.output.display(),
        "vault snapshot written"
    );
    println!("Vault initialized.");
    println!("  Vault       : {}", args.vault);
    println!("  Base asset  : {}", args.base_asset);
    println!("  Destinations: {}", args.destinations.len());
    println!("  Snapshot    : {}", args.output.display());
    Ok(())
}

fn inspect(args: cli::InspectArgs) -> Result<()> {
    let vault = read_snapshot(&args.snapshot)?;
    let summary = VaultSummary::from_vault(&vault, unix_now()?)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.render());
    }
    Ok(())
}

/// Input of the `verify` subcommand.
#[derive(Debug, Deserialize)]
struct RebalanceRequest {
    params: RebalanceParams,
    in_stats: SummaryStats,
    out_stats: SummaryStats,
}

fn verify(args: cli::VerifyArgs) -> Result<()> {
    let vault = read_snapshot(&args.snapshot)?;
    let request: RebalanceRequest = read_json(&args.request)?;
    let now = match args.now {
        Some(now) => now,
        None => unix_now()?,
    };

    let verdict = vault.verify_rebalance(&request.params, &request.in_stats, &request.out_stats, now);
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    match verdict.reason {
        None => Ok(()),
        Some(reason) => bail!("rebalance rejected: {reason}"),
    }
}

#[derive(Debug, Serialize)]
struct SpotPrice {
    token: Address,
    quote: Address,
    price: u128,
    price_decimal: String,
}

#[derive(Debug, Serialize)]
struct SafePriceInputs {
    pool: Address,
    total_supply: u128,
    reserves: Vec<ReserveItemInfo>,
}

fn price(args: cli::PriceArgs) -> Result<()> {
    let pool: Pool = read_json(&args.pool)?;

    if args.safe {
        let (total_supply, reserves) = get_safe_spot_price_info(&pool, pool.address(), args.quote)
            .context("failed to collect safe-price inputs")?;
        let out = SafePriceInputs {
            pool: pool.address(),
            total_supply,
            reserves,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let Some(token) = args.token else {
        bail!("--token is required without --safe");
    };
    let (price, quote) =
        get_spot_price(token, &pool, args.quote).context("failed to price token")?;
    let out = SpotPrice {
        token,
        quote,
        price,
        price_decimal: format_wad(price),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn render_metrics(args: cli::MetricsArgs, settings: &NodeSettings) -> Result<()> {
    let vault = read_snapshot(&args.snapshot)?;
    let now = match args.now {
        Some(now) => now,
        None => unix_now()?,
    };
    let metrics =
        VaultMetrics::new(&settings.metrics.namespace).context("failed to create metrics")?;
    metrics.observe(&vault, now)?;
    print!("{}", metrics.encode()?);
    Ok(())
}

fn print_version() {
    println!("autopool-node {}", env!("CARGO_PKG_VERSION"));
    println!("layout        v{}", LAYOUT_VERSION);
    println!("rustc         {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

// ---------------------------------------------------------------------------
// Snapshot summary
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct DestinationSummary {
    address: Address,
    status: ShutdownStatus,
    internal_debt_amount: u128,
    external_debt_amount: u128,
    last_reported_value: u128,
    last_report: Option<String>,
}

#[derive(Debug, Serialize)]
struct VaultSummary {
    vault: Address,
    base_asset: Address,
    status: ShutdownStatus,
    total_idle: u128,
    total_debt: u128,
    total_assets: u128,
    total_supply: u128,
    nav_per_share: String,
    nav_samples: usize,
    last_nav_sample: Option<String>,
    rebalance_paused: bool,
    withdrawal_queue: Vec<Address>,
    removal_queue: Vec<Address>,
    destinations: Vec<DestinationSummary>,
}

impl VaultSummary {
    fn from_vault(vault: &Autopool, now: u64) -> Result<Self> {
        let ledger = vault.ledger();
        let strategy = vault.strategy();

        let destinations = ledger
            .registered_destinations()
            .map(|&address| {
                let info = ledger.destination_info(&address).copied().unwrap_or_default();
                DestinationSummary {
                    address,
                    status: ledger.destination_status(&address),
                    internal_debt_amount: info.internal_debt_amount,
                    external_debt_amount: info.external_debt_amount,
                    last_reported_value: info.last_reported_value,
                    last_report: (info.last_report_timestamp > 0)
                        .then(|| format_timestamp(info.last_report_timestamp)),
                }
            })
            .collect();

        Ok(Self {
            vault: ledger.config().vault,
            base_asset: ledger.config().base_asset,
            status: ledger.status(),
            total_idle: ledger.total_idle(),
            total_debt: ledger.total_debt(),
            total_assets: ledger.total_assets()?,
            total_supply: ledger.total_supply(),
            nav_per_share: format_wad(ledger.nav_per_share()?),
            nav_samples: strategy.nav_history().len(),
            last_nav_sample: strategy
                .nav_history()
                .latest()
                .map(|s| format_timestamp(s.timestamp)),
            rebalance_paused: strategy.is_paused(now),
            withdrawal_queue: ledger.withdrawal_queue().as_slice().to_vec(),
            removal_queue: ledger.removal_queue().iter().copied().collect(),
            destinations,
        })
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let mut line = |s: String| {
            out.push_str(&s);
            out.push('\n');
        };
        line(format!("Vault          : {} ({})", self.vault, self.status));
        line(format!("Base asset     : {}", self.base_asset));
        line(format!("Idle           : {}", self.total_idle));
        line(format!("Debt           : {}", self.total_debt));
        line(format!("Total assets   : {}", self.total_assets));
        line(format!("Total supply   : {}", self.total_supply));
        line(format!("NAV per share  : {}", self.nav_per_share));
        line(format!(
            "NAV samples    : {} (last {})",
            self.nav_samples,
            self.last_nav_sample.as_deref().unwrap_or("never")
        ));
        line(format!("Paused         : {}", self.rebalance_paused));
        line(format!("Withdrawal queue ({}):", self.withdrawal_queue.len()));
        for (i, address) in self.withdrawal_queue.iter().enumerate() {
            line(format!("  {i:>3}. {address}"));
        }
        if !self.removal_queue.is_empty() {
            line(format!("Pending removal ({}):", self.removal_queue.len()));
            for address in &self.removal_queue {
                line(format!("       {address}"));
            }
        }
        line(format!("Destinations ({}):", self.destinations.len()));
        for d in &self.destinations {
            line(format!(
                "  {} [{}] value={} internal={} external={} reported={}",
                d.address,
                d.status,
                d.last_reported_value,
                d.internal_debt_amount,
                d.external_debt_amount,
                d.last_report.as_deref().unwrap_or("never"),
            ));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn read_snapshot(path: &Path) -> Result<Autopool> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Autopool::from_json(&text).with_context(|| format!("failed to load {}", path.display()))
}

fn write_snapshot(vault: &Autopool, path: &Path) -> Result<()> {
    let json = vault.to_json().context("failed to serialize vault")?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

fn unix_now() -> Result<u64> {
    u64::try_from(chrono::Utc::now().timestamp()).context("system clock before 1970")
}

/// Renders a WAD-scaled value as a decimal string.
fn format_wad(value: u128) -> String {
    let whole = value / WAD;
    let frac = value % WAD;
    format!("{whole}.{frac:0width$}", width = WAD_DECIMALS as usize)
}

fn format_timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map_or_else(|| secs.to_string(), |t| t.to_rfc3339())
}
