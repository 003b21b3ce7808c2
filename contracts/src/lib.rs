//! # Autopool Contracts
//!
//! Vault-level logic built on the accounting core:
//!
//! - **Strategy**: accepts or rejects proposed rebalances against the
//!   vault's books, its NAV trend and the prices a solver supplies. Owns the
//!   NAV history and the cooldown state.
//! - **Autopool**: ties a debt ledger and a strategy together: reporting
//!   rounds feed NAV samples, accepted rebalances are booked and recorded.
//!
//! ## Design Principles
//!
//! 1. Rejections carry a typed reason that renders to readable text. An
//!    operator should never have to decode a number to learn why a
//!    rebalance was refused.
//! 2. The strategy reads the ledger; it never writes to it.
//! 3. Every public type is serializable (serde) so a whole vault can be
//!    snapshotted and restored.

pub mod autopool;
pub mod strategy;

pub use autopool::{Autopool, AutopoolError, DebtReport, SnapshotError};
pub use strategy::{
    AutopoolStrategy, RebalanceVerdict, RejectReason, StrategyConfig, StrategyError, SummaryStats,
};
