//! Stats command implementation.

use super::emit;
use super::pending::OperationInfo;
use crate::config::CliConfig;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use stride_oplog::{OperationLog, SystemClock};
use stride_storage::FileStore;

/// Log and journal statistics.
#[derive(Debug, Serialize)]
pub struct LogStats {
    /// Operations waiting for delivery.
    pub pending: usize,
    /// Dead-lettered operations.
    pub dead_letters: usize,
    /// Distinct ordering lanes among pending operations.
    pub lanes: usize,
    /// Pending operations with at least one failed attempt.
    pub retrying: usize,
    /// Pending operations past the maximum age.
    pub expired: usize,
    /// Creation time of the oldest pending operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_created_at: Option<u64>,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Bytes held by superseded records.
    pub garbage_bytes: u64,
}

/// Gathers statistics for the journal at `path`.
pub fn collect(path: &Path, config: &CliConfig) -> Result<LogStats, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("Journal not found: {}", path.display()).into());
    }
    let store = FileStore::open_with_config(path, config.store.clone())?;
    let journal_bytes = store.size();
    let garbage_bytes = store.garbage_bytes();
    let log = OperationLog::open(Box::new(store), Arc::new(SystemClock))?;

    let now = log.clock().now_millis();
    let pending = log.pending();
    let lanes: BTreeSet<_> = pending.iter().map(|op| op.lane()).collect();
    let expired = pending
        .iter()
        .filter(|op| OperationInfo::new(op, now, config).expired)
        .count();

    Ok(LogStats {
        pending: pending.len(),
        dead_letters: log.dead_letter_count(),
        lanes: lanes.len(),
        retrying: pending.iter().filter(|op| op.attempts > 0).count(),
        expired,
        oldest_created_at: pending.iter().map(|op| op.created_at).min(),
        journal_bytes,
        garbage_bytes,
    })
}

/// Runs the stats command.
pub fn run(
    path: &Path,
    config: &CliConfig,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let stats = collect(path, config)?;
    emit(format, &stats, || {
        println!("Operation log: {}", path.display());
        println!();
        println!("  Pending:       {}", stats.pending);
        println!("  Lanes:         {}", stats.lanes);
        println!("  Retrying:      {}", stats.retrying);
        println!("  Expired:       {}", stats.expired);
        println!("  Dead letters:  {}", stats.dead_letters);
        if let Some(oldest) = stats.oldest_created_at {
            println!("  Oldest:        {oldest} (unix ms)");
        }
        println!();
        println!("  Journal size:  {} bytes", stats.journal_bytes);
        println!("  Garbage:       {} bytes", stats.garbage_bytes);
    })
}
