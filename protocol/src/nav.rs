//! # NAV History
//!
//! A fixed-capacity ring buffer of NAV-per-share samples. The strategy
//! consults it to detect sustained NAV decay ("is today worse than 30, 60
//! and 90 samples ago?") and pause risky rebalances.
//!
//! ## Layout
//!
//! ```text
//!   slots: [ s0 | s1 | s2 | ... | s90 ]      exactly 91 slots, never grows
//!                   ^
//!                   current_index            most recent sample
//!   len                                      samples written, capped at 91
//!   last_finalized_timestamp                 gate for the next insert
//! ```
//!
//! Insertion writes the slot after `current_index` (mod 91) and is only
//! accepted for a strictly newer timestamp, so the buffer is ordered by
//! construction. A stale or duplicate timestamp leaves the state untouched.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MAX_NAV_TIMESTAMP, MAX_NAV_TRACKING};
use crate::error::{Classify, ErrorKind};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by NAV history operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NavError {
    /// The timestamp does not fit the 40-bit storage width.
    #[error("nav timestamp {0} exceeds 40-bit range")]
    TimestampOutOfRange(u64),

    /// A persisted history does not have the fixed ring shape.
    #[error("malformed nav history: {0}")]
    MalformedLayout(String),
}

impl Classify for NavError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

// ---------------------------------------------------------------------------
// NavSnapshot
// ---------------------------------------------------------------------------

/// One NAV-per-share sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavSnapshot {
    /// Epoch seconds, at most 40 bits wide.
    pub timestamp: u64,
    /// NAV per share, WAD-scaled.
    pub nav_per_share: u128,
}

// ---------------------------------------------------------------------------
// NavHistory
// ---------------------------------------------------------------------------

/// Ring buffer of the last [`MAX_NAV_TRACKING`] accepted samples.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawNavHistory")]
pub struct NavHistory {
    len: usize,
    current_index: usize,
    last_finalized_timestamp: u64,
    slots: Vec<NavSnapshot>,
}

impl NavHistory {
    /// Creates an empty history with all slots zeroed.
    pub fn new() -> Self {
        Self {
            len: 0,
            current_index: 0,
            last_finalized_timestamp: 0,
            slots: vec![NavSnapshot::default(); MAX_NAV_TRACKING],
        }
    }

    /// Records a sample.
    ///
    /// Returns `Ok(false)` without touching any state unless `timestamp` is
    /// strictly greater than [`last_finalized_timestamp`](Self::last_finalized_timestamp).
    ///
    /// # Errors
    ///
    /// Returns [`NavError::TimestampOutOfRange`] if `timestamp` does not fit
    /// in 40 bits.
    pub fn insert(&mut self, nav_per_share: u128, timestamp: u64) -> Result<bool, NavError> {
        if timestamp > MAX_NAV_TIMESTAMP {
            return Err(NavError::TimestampOutOfRange(timestamp));
        }
        if timestamp <= self.last_finalized_timestamp {
            tracing::debug!(
                timestamp,
                last = self.last_finalized_timestamp,
                "stale nav sample ignored"
            );
            return Ok(false);
        }

        let next = (self.current_index + 1) % MAX_NAV_TRACKING;
        self.slots[next] = NavSnapshot {
            timestamp,
            nav_per_share,
        };
        self.current_index = next;
        self.last_finalized_timestamp = timestamp;
        if self.len < MAX_NAV_TRACKING {
            self.len += 1;
        }
        Ok(true)
    }

    /// NAV per share recorded `n` samples before the most recent one.
    ///
    /// `get_days_ago(0)` is the latest sample. Returns `None` when fewer than
    /// `n + 1` samples have been recorded.
    pub fn get_days_ago(&self, n: usize) -> Option<u128> {
        if n >= self.len {
            return None;
        }
        let index = (self.current_index + MAX_NAV_TRACKING - n) % MAX_NAV_TRACKING;
        Some(self.slots[index].nav_per_share)
    }

    /// The most recent sample, if any.
    pub fn latest(&self) -> Option<NavSnapshot> {
        if self.len == 0 {
            None
        } else {
            Some(self.slots[self.current_index])
        }
    }

    /// Raw slot access, `None` past capacity.
    pub fn slot(&self, index: usize) -> Option<&NavSnapshot> {
        self.slots.get(index)
    }

    /// Number of samples held, at most [`MAX_NAV_TRACKING`].
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` before the first accepted insert.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slot holding the most recent sample.
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Timestamp of the most recent accepted sample (0 when empty).
    pub fn last_finalized_timestamp(&self) -> u64 {
        self.last_finalized_timestamp
    }
}

impl Default for NavHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Unvalidated persisted shape. Converted through `TryFrom` so a snapshot
/// that breaks the ring invariants never becomes a live [`NavHistory`].
#[derive(Deserialize)]
struct RawNavHistory {
    len: usize,
    current_index: usize,
    last_finalized_timestamp: u64,
    slots: Vec<NavSnapshot>,
}

impl TryFrom<RawNavHistory> for NavHistory {
    type Error = NavError;

    fn try_from(raw: RawNavHistory) -> Result<Self, Self::Error> {
        if raw.slots.len() != MAX_NAV_TRACKING {
            return Err(NavError::MalformedLayout(format!(
                "expected {} slots, found {}",
                MAX_NAV_TRACKING,
                raw.slots.len()
            )));
        }
        if raw.len > MAX_NAV_TRACKING || raw.current_index >= MAX_NAV_TRACKING {
            return Err(NavError::MalformedLayout(format!(
                "len {} / current_index {} out of range",
                raw.len, raw.current_index
            )));
        }
        if raw.last_finalized_timestamp > MAX_NAV_TIMESTAMP {
            return Err(NavError::TimestampOutOfRange(raw.last_finalized_timestamp));
        }
        Ok(Self {
            len: raw.len,
            current_index: raw.current_index,
            last_finalized_timestamp: raw.last_finalized_timestamp,
            slots: raw.slots,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
