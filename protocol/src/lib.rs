// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Autopool Protocol: Accounting Core
//!
//! The books of a multi-destination yield vault. An autopool takes deposits
//! in a single base asset, deploys them to external venues ("destinations"),
//! and has to answer three questions at all times: how much is out there,
//! in what order do we pull it back, and is the number we're looking at
//! real or is someone pushing a pool around inside a single block.
//!
//! ## Architecture
//!
//! - **address**: 20-byte identifiers for tokens, pools, vaults and accounts.
//! - **math**: WAD fixed point and overflow-safe `mul_div`.
//! - **pricing**: Unit-swap spot prices across stable, weighted and
//!   composable pools, plus the raw reserve figures an aggregator needs to
//!   compute a manipulation-resistant safe price.
//! - **nav**: 91-slot ring buffer of NAV-per-share samples.
//! - **ledger**: Per-destination debt, the withdrawal queue, the removal
//!   queue, shutdown state and share accounting.
//! - **error**: The error taxonomy shared by every module.
//! - **config**: Protocol constants.
//!
//! ## Design Philosophy
//!
//! 1. Every operation is all-or-nothing. Ledger mutations run against a
//!    staged copy and commit only when the whole operation succeeds.
//! 2. Never trust a collaborator's return value for an amount. Read the
//!    balance before, read it after, book the difference.
//! 3. Checked arithmetic everywhere money moves.
//! 4. If it touches money, it has tests. Plural.

pub mod address;
pub mod config;
pub mod error;
pub mod ledger;
pub mod math;
pub mod nav;
pub mod pricing;

pub use address::Address;
pub use error::{Classify, ErrorKind};
