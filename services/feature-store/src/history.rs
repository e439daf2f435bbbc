//! Per-key version history

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use types::record::StoreRecord;

/// Every retained version of one key, ascending
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyHistory {
    versions: BTreeMap<u64, StoreRecord>,
}

impl KeyHistory {
    pub fn latest(&self) -> Option<&StoreRecord> {
        self.versions.values().next_back()
    }

    pub fn latest_version(&self) -> Option<u64> {
        self.versions.keys().next_back().copied()
    }

    pub fn get(&self, version: u64) -> Option<&StoreRecord> {
        self.versions.get(&version)
    }

    /// Newest record computed at or before `timestamp`
    pub fn at(&self, timestamp: i64) -> Option<&StoreRecord> {
        self.versions
            .values()
            .rev()
            .find(|r| r.vector.computed_at <= timestamp)
    }

    /// Insert when `record` advances the latest version. Returns whether it
    /// was inserted.
    pub fn advance(&mut self, record: StoreRecord) -> bool {
        if matches!(self.latest_version(), Some(v) if record.version() <= v) {
            return false;
        }
        self.versions.insert(record.version(), record);
        true
    }

    /// Drop the oldest versions beyond `max`. The latest is always kept.
    pub fn trim(&mut self, max: usize) -> usize {
        let max = max.max(1);
        let mut removed = 0;
        while self.versions.len() > max {
            self.versions.pop_first();
            removed += 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &StoreRecord> {
        self.versions.values()
    }
}
