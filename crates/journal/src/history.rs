//! Append-only change history

use parking_lot::RwLock;
use std::collections::VecDeque;
use warden_core::ChangeRecord;

/// Default number of records retained in memory
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// Arrival-ordered log of every emitted change record (unlinks included)
///
/// Bounded: once `limit` records are held, the oldest is dropped for each
/// new append.
pub struct ChangeHistory {
    entries: RwLock<VecDeque<ChangeRecord>>,
    limit: usize,
}

impl ChangeHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    /// Append a record
    pub fn record(&self, record: ChangeRecord) {
        let mut entries = self.entries.write();
        if entries.len() == self.limit {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Every retained record, oldest first
    pub fn all(&self) -> Vec<ChangeRecord> {
        self.entries.read().iter().cloned().collect()
    }

    /// The `count` most recent records, still in arrival order
    pub fn recent(&self, count: usize) -> Vec<ChangeRecord> {
        let entries = self.entries.read();
        let start = entries.len().saturating_sub(count);
        entries.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for ChangeHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
