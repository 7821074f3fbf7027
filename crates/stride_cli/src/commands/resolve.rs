//! Requeue and discard commands.

use super::open_log;
use crate::config::CliConfig;
use std::path::Path;

/// Moves dead letter `id` back into the pending log under a new id.
pub fn requeue(
    path: &Path,
    config: &CliConfig,
    id: u64,
) -> Result<u64, Box<dyn std::error::Error>> {
    let log = open_log(path, config)?;
    let op = log
        .requeue_dead_letter(id)?
        .ok_or_else(|| format!("No dead letter with id {id}"))?;
    println!("✓ Requeued {id} as {} ({})", op.id, op.kind);
    Ok(op.id)
}

/// Deletes dead letter `id`.
pub fn discard(path: &Path, config: &CliConfig, id: u64) -> Result<(), Box<dyn std::error::Error>> {
    let log = open_log(path, config)?;
    if !log.discard_dead_letter(id)? {
        return Err(format!("No dead letter with id {id}").into());
    }
    println!("✓ Discarded {id}");
    Ok(())
}
