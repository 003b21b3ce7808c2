//! # CLI Interface
//!
//! Command-line structure for `autopool-node`, built with `clap` derive.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use autopool_protocol::Address;

/// Autopool operator tool.
///
/// Creates and inspects vault snapshots, checks proposed rebalances
/// against a snapshot, prices tokens in pool snapshots and renders
/// Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "autopool-node",
    about = "Autopool operator tool",
    version,
    propagate_version = true
)]
pub struct AutopoolNodeCli {
    /// Settings file (TOML). Missing files are ignored.
    #[arg(long, short = 'c', global = true, env = "AUTOPOOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format override: `pretty` or `json`.
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a fresh, empty vault snapshot.
    Init(InitArgs),
    /// Summarize a vault snapshot.
    Inspect(InspectArgs),
    /// Check a proposed rebalance against a vault snapshot.
    Verify(VerifyArgs),
    /// Price a token in a pool snapshot.
    Price(PriceArgs),
    /// Render a vault snapshot as Prometheus metrics.
    Metrics(MetricsArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for `init`.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Vault address (hex).
    #[arg(long)]
    pub vault: Address,

    /// Base asset address (hex).
    #[arg(long)]
    pub base_asset: Address,

    /// Destinations to register right away.
    #[arg(long = "destination", value_delimiter = ',')]
    pub destinations: Vec<Address>,

    /// Where to write the snapshot.
    #[arg(long, short = 'o', default_value = "autopool.json")]
    pub output: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for `inspect`.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Vault snapshot (JSON).
    pub snapshot: PathBuf,

    /// Print the summary as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `verify`.
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Vault snapshot (JSON).
    pub snapshot: PathBuf,

    /// Rebalance request (JSON): `params`, `in_stats`, `out_stats`.
    pub request: PathBuf,

    /// Evaluation time in epoch seconds. Defaults to now.
    #[arg(long)]
    pub now: Option<u64>,
}

/// Arguments for `price`.
#[derive(Parser, Debug)]
pub struct PriceArgs {
    /// Pool snapshot (JSON).
    pub pool: PathBuf,

    /// Token to price. Required unless `--safe` is given.
    #[arg(long, required_unless_present = "safe")]
    pub token: Option<Address>,

    /// Requested quote token.
    #[arg(long)]
    pub quote: Address,

    /// Report total supply and per-reserve prices for safe-price
    /// aggregation instead of a single spot price.
    #[arg(long)]
    pub safe: bool,
}

/// Arguments for `metrics`.
#[derive(Parser, Debug)]
pub struct MetricsArgs {
    /// Vault snapshot (JSON).
    pub snapshot: PathBuf,

    /// Evaluation time for the pause gauge, in epoch seconds. Defaults to now.
    #[arg(long)]
    pub now: Option<u64>,
}
