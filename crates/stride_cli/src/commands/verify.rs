//! Verify command implementation.

use std::path::Path;
use std::sync::Arc;
use stride_oplog::{OperationLog, SystemClock};
use stride_storage::{FileStore, FileStoreConfig, InMemoryStore, JournalReport, KvStore};

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Journal framing and checksum scan.
    pub journal: JournalReport,
    /// Records that failed to decode as log entries.
    pub errors: Vec<String>,
    /// Pending operations found.
    pub pending: usize,
    /// Dead letters found.
    pub dead_letters: usize,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.journal.is_clean() && self.errors.is_empty()
    }
}

/// Checks the journal at `path` without modifying it.
///
/// Log records are decoded from a copy in memory, so an interrupted
/// dead-letter move is reported but not repaired.
pub fn check(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("Journal not found: {}", path.display()).into());
    }

    let journal = FileStore::verify(path)?;
    let mut result = VerifyResult {
        journal,
        errors: Vec::new(),
        pending: 0,
        dead_letters: 0,
    };
    if !result.journal.is_clean() {
        return Ok(result);
    }

    let mut copy = InMemoryStore::new();
    {
        let store = FileStore::open_with_config(path, FileStoreConfig::new().lock(false))?;
        for (key, value) in store.scan_prefix("")? {
            copy.put(&key, &value)?;
        }
    }

    match OperationLog::open(Box::new(copy), Arc::new(SystemClock)) {
        Ok(log) => {
            result.pending = log.count();
            result.dead_letters = log.dead_letter_count();
        }
        Err(e) => result.errors.push(e.to_string()),
    }
    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying journal at {}", path.display());
    println!();

    let result = check(path)?;
    let journal = &result.journal;
    println!("  Records:        {}", journal.records);
    println!("  Live keys:      {}", journal.live_keys);
    println!("  Valid bytes:    {}", journal.valid_bytes);
    if journal.trailing_bytes > 0 {
        println!("  Damaged tail:   {} bytes", journal.trailing_bytes);
    }
    if let Some(problem) = &journal.problem {
        println!("  Problem:        {problem}");
    }
    if journal.is_clean() {
        println!("  Pending:        {}", result.pending);
        println!("  Dead letters:   {}", result.dead_letters);
    }
    for error in &result.errors {
        println!("  Error:          {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Journal verification passed");
        Ok(())
    } else {
        println!("✗ Journal verification failed");
        Err("Verification failed".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn journal(path: &Path) {
        let store = FileStore::open(path).unwrap();
        let log = OperationLog::open(Box::new(store), Arc::new(SystemClock)).unwrap();
        log.enqueue("task.complete", vec![1]).unwrap();
        log.enqueue("task.complete", vec![2]).unwrap();
    }

    #[test]
    fn clean_journal_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oplog.journal");
        journal(&path);

        let result = check(&path).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.pending, 2);
    }

    #[test]
    fn torn_tail_fails_and_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oplog.journal");
        journal(&path);
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"STRJ\x01").unwrap();
        drop(file);
        let size = std::fs::metadata(&path).unwrap().len();

        let result = check(&path).unwrap();
        assert!(!result.is_ok());
        assert_eq!(result.journal.trailing_bytes, 5);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size);
    }

    #[test]
    fn undecodable_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oplog.journal");
        {
            let mut store = FileStore::open(&path).unwrap();
            store.put("op/00000000000000000001", b"not cbor").unwrap();
            store.flush().unwrap();
        }

        let result = check(&path).unwrap();
        assert!(result.journal.is_clean());
        assert_eq!(result.errors.len(), 1);
    }
}
