//! Withdrawal and removal queues.
//!
//! The withdrawal queue is the order in which destinations are drained to
//! satisfy a withdrawal. It is a plain `Vec`: queues hold a handful of
//! destinations, and relocation is a linear scan either way.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::address::Address;

/// Ordered destinations, each at most once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WithdrawalQueue(Vec<Address>);

impl WithdrawalQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Moves `destination` to the front, inserting it if absent.
    pub fn add_to_head(&mut self, destination: Address) {
        self.remove(&destination);
        self.0.insert(0, destination);
    }

    /// Moves `destination` to the back, inserting it if absent.
    pub fn add_to_tail(&mut self, destination: Address) {
        self.remove(&destination);
        self.0.push(destination);
    }

    /// Appends only if absent; an existing entry keeps its position.
    pub fn push_if_absent(&mut self, destination: Address) -> bool {
        if self.contains(&destination) {
            return false;
        }
        self.0.push(destination);
        true
    }

    /// Replaces the whole queue.
    ///
    /// Returns the first repeated entry, leaving the queue untouched, if
    /// `entries` contains duplicates.
    pub fn set(&mut self, entries: Vec<Address>) -> Result<(), Address> {
        let mut seen = BTreeSet::new();
        for entry in &entries {
            if !seen.insert(*entry) {
                return Err(*entry);
            }
        }
        self.0 = entries;
        Ok(())
    }

    /// Removes `destination`, returning whether it was present.
    pub fn remove(&mut self, destination: &Address) -> bool {
        match self.0.iter().position(|d| d == destination) {
            Some(index) => {
                self.0.remove(index);
                true
            }
            None => false,
        }
    }

    /// Membership test.
    pub fn contains(&self, destination: &Address) -> bool {
        self.0.contains(destination)
    }

    /// Entries in drain order.
    pub fn as_slice(&self) -> &[Address] {
        &self.0
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no destination is queued.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Destinations flagged for deregistration once their balance is gone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemovalQueue(BTreeSet<Address>);

impl RemovalQueue {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Flags `destination`. Returns `false` if it already was.
    pub fn insert(&mut self, destination: Address) -> bool {
        self.0.insert(destination)
    }

    /// Clears the flag.
    pub fn remove(&mut self, destination: &Address) -> bool {
        self.0.remove(destination)
    }

    /// Membership test.
    pub fn contains(&self, destination: &Address) -> bool {
        self.0.contains(destination)
    }

    /// Flagged destinations in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.0.iter()
    }

    /// Number of flagged destinations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when nothing is pending removal.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
