//! Branch log - an append-only log whose entries keep every regenerated alternative.
//!
//! Each [`BranchableEntry`] holds all alternatives ("swipes") produced for one
//! log position plus the index of the one currently shown. The current value is
//! always read through `swipes[swipe_index]`, so the primary value can never
//! drift from the selected alternative.
//!
//! ```text
//! entry 0: [A]            swipe_index 0 -> A
//! entry 1: [B, B', B'']   swipe_index 1 -> B'
//! entry 2: [C]            swipe_index 0 -> C
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected branch-log operation. Nothing was mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BranchError {
    #[error("Log entry {index} does not exist (log has {len} entries)")]
    EntryOutOfRange { index: usize, len: usize },

    #[error("Alternative {index} does not exist for entry {entry} ({len} alternatives)")]
    SwipeOutOfRange { entry: usize, index: usize, len: usize },
}

/// One log position and all of its alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    try_from = "RawBranchableEntry<T>",
    bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>")
)]
pub struct BranchableEntry<T> {
    swipes: Vec<T>,
    swipe_index: usize,
}

impl<T> BranchableEntry<T> {
    pub fn new(value: T) -> Self {
        Self {
            swipes: vec![value],
            swipe_index: 0,
        }
    }

    /// The currently selected alternative.
    pub fn current(&self) -> &T {
        &self.swipes[self.swipe_index]
    }

    pub fn swipes(&self) -> &[T] {
        &self.swipes
    }

    pub fn swipe_index(&self) -> usize {
        self.swipe_index
    }

    pub fn swipe_count(&self) -> usize {
        self.swipes.len()
    }

    /// Append a new alternative and make it current. Returns its index.
    pub fn add_swipe(&mut self, value: T) -> usize {
        self.swipes.push(value);
        self.swipe_index = self.swipes.len() - 1;
        self.swipe_index
    }

    /// Select an existing alternative without altering any of them.
    pub fn set_swipe(&mut self, index: usize) -> Result<&T, usize> {
        if index >= self.swipes.len() {
            return Err(self.swipes.len());
        }
        self.swipe_index = index;
        Ok(self.current())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBranchableEntry<T> {
    swipes: Vec<T>,
    #[serde(default)]
    swipe_index: usize,
}

impl<T> TryFrom<RawBranchableEntry<T>> for BranchableEntry<T> {
    type Error = String;

    fn try_from(raw: RawBranchableEntry<T>) -> Result<Self, Self::Error> {
        if raw.swipes.is_empty() {
            return Err("branch entry must hold at least one alternative".to_string());
        }
        if raw.swipe_index >= raw.swipes.len() {
            return Err(format!(
                "swipe index {} out of range for {} alternatives",
                raw.swipe_index,
                raw.swipes.len()
            ));
        }
        Ok(Self {
            swipes: raw.swipes,
            swipe_index: raw.swipe_index,
        })
    }
}

/// Ordered sequence of branchable entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    transparent,
    bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>")
)]
pub struct BranchLog<T> {
    entries: Vec<BranchableEntry<T>>,
}

impl<T> Default for BranchLog<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> BranchLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new entry. Returns its index.
    pub fn add_entry(&mut self, value: T) -> usize {
        self.entries.push(BranchableEntry::new(value));
        self.entries.len() - 1
    }

    /// Append an alternative to an existing entry and make it current.
    ///
    /// Never creates a missing entry. Returns the new swipe index.
    pub fn add_swipe(&mut self, entry_index: usize, value: T) -> Result<usize, BranchError> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(entry_index)
            .ok_or(BranchError::EntryOutOfRange {
                index: entry_index,
                len,
            })?;
        Ok(entry.add_swipe(value))
    }

    /// Switch which alternative of an entry is current.
    pub fn set_swipe(&mut self, entry_index: usize, swipe_index: usize) -> Result<&T, BranchError> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(entry_index)
            .ok_or(BranchError::EntryOutOfRange {
                index: entry_index,
                len,
            })?;
        entry
            .set_swipe(swipe_index)
            .map_err(|swipes| BranchError::SwipeOutOfRange {
                entry: entry_index,
                index: swipe_index,
                len: swipes,
            })
    }

    pub fn get(&self, index: usize) -> Option<&BranchableEntry<T>> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[BranchableEntry<T>] {
        &self.entries
    }

    pub fn last_index(&self) -> Option<usize> {
        self.entries.len().checked_sub(1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current value of every entry, in order.
    pub fn current_values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(BranchableEntry::current)
    }
}
