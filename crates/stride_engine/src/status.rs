//! Externally visible sync state.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// The current state of the sync coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncStatus {
    /// Nothing is running.
    Idle,
    /// A run is draining the log.
    Syncing,
    /// The last run emptied the log. Shown for the display window.
    Success,
    /// The last run left operations behind or hit a terminal error.
    Error,
}

impl SyncStatus {
    /// Returns true while a run is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Syncing)
    }

    /// Returns true for the transient outcome states.
    pub fn is_outcome(&self) -> bool {
        matches!(self, SyncStatus::Success | SyncStatus::Error)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// One finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncHistoryEntry {
    /// When the run finished, in unix milliseconds.
    pub timestamp: u64,
    /// `Success` or `Error`.
    pub status: SyncStatus,
    /// Operations delivered during the run.
    pub item_count: usize,
    /// Why the run ended in `Error`.
    pub error: Option<String>,
}

/// Bounded run history; the oldest entry is evicted on overflow.
#[derive(Debug, Clone)]
pub(crate) struct SyncHistory {
    entries: VecDeque<SyncHistoryEntry>,
    capacity: usize,
}

impl SyncHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, entry: SyncHistoryEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub(crate) fn to_vec(&self) -> Vec<SyncHistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Cumulative statistics since the coordinator was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Runs started.
    pub runs: u64,
    /// Runs that ended in `Success`.
    pub successful_runs: u64,
    /// Runs that ended in `Error`.
    pub failed_runs: u64,
    /// Operations acknowledged by the remote.
    pub operations_delivered: u64,
    /// Operations moved to the dead-letter record.
    pub operations_dead_lettered: u64,
    /// Retryable failures recorded.
    pub retries: u64,
    /// When the last run finished, in unix milliseconds.
    pub last_sync_time: Option<u64>,
    /// Error of the last failed run.
    pub last_error: Option<String>,
}
