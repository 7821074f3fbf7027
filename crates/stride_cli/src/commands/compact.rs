//! Compact command implementation.

use crate::config::CliConfig;
use std::path::Path;
use stride_storage::FileStore;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction (projected on a dry run).
    pub bytes_after: u64,
    /// Whether the journal was rewritten.
    pub rewritten: bool,
}

/// Compacts the journal at `path` unless `dry_run` is set or there is
/// nothing to reclaim.
pub fn compact(
    path: &Path,
    config: &CliConfig,
    dry_run: bool,
) -> Result<CompactStats, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("Journal not found: {}", path.display()).into());
    }
    let mut store = FileStore::open_with_config(path, config.store.clone())?;
    let bytes_before = store.size();
    let garbage = store.garbage_bytes();

    if dry_run || garbage == 0 {
        return Ok(CompactStats {
            bytes_before,
            bytes_after: bytes_before - garbage,
            rewritten: false,
        });
    }

    store.compact()?;
    Ok(CompactStats {
        bytes_before,
        bytes_after: store.size(),
        rewritten: true,
    })
}

/// Runs the compact command.
pub fn run(
    path: &Path,
    config: &CliConfig,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting journal at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = compact(path, config, dry_run)?;
    let saved = stats.bytes_before - stats.bytes_after;
    println!("  Size before: {} bytes", stats.bytes_before);
    println!("  Size after:  {} bytes", stats.bytes_after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        saved,
        if stats.bytes_before > 0 {
            saved as f64 / stats.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );

    println!();
    if stats.rewritten {
        println!("✓ Compaction complete");
    } else if saved == 0 {
        println!("No compaction needed - journal holds only live records");
    }
    Ok(())
}
