//! Journal-backed key-value store for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::record::JournalRecord;
use crate::store::KvStore;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for a [`FileStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    /// Whether `flush` calls `sync_data` (safer but slower).
    pub sync_on_flush: bool,
    /// Minimum garbage bytes before automatic compaction is considered.
    pub compact_min_garbage: u64,
    /// Optional hard cap on the journal size in bytes.
    pub max_bytes: Option<u64>,
    /// Whether to take an exclusive advisory lock on the journal.
    pub lock: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            sync_on_flush: true,
            compact_min_garbage: 1024 * 1024, // 1 MB
            max_bytes: None,
            lock: true,
        }
    }
}

impl FileStoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether `flush` syncs to disk.
    #[must_use]
    pub const fn sync_on_flush(mut self, value: bool) -> Self {
        self.sync_on_flush = value;
        self
    }

    /// Sets the garbage threshold for automatic compaction.
    #[must_use]
    pub const fn compact_min_garbage(mut self, bytes: u64) -> Self {
        self.compact_min_garbage = bytes;
        self
    }

    /// Sets the journal size cap.
    #[must_use]
    pub const fn max_bytes(mut self, bytes: u64) -> Self {
        self.max_bytes = Some(bytes);
        self
    }

    /// Sets whether to lock the journal file.
    #[must_use]
    pub const fn lock(mut self, value: bool) -> Self {
        self.lock = value;
        self
    }
}

/// Result of scanning a journal without opening it for writing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JournalReport {
    /// Number of intact records.
    pub records: usize,
    /// Number of live keys after replay.
    pub live_keys: usize,
    /// Bytes covered by intact records.
    pub valid_bytes: u64,
    /// Bytes after the last intact record (torn or corrupt tail).
    pub trailing_bytes: u64,
    /// Description of the first problem found, if any.
    pub problem: Option<String>,
}

impl JournalReport {
    /// Returns true if the whole journal replayed cleanly.
    pub fn is_clean(&self) -> bool {
        self.trailing_bytes == 0 && self.problem.is_none()
    }
}

/// A key-value store persisted as an append-only journal.
///
/// Every `put` and `delete` appends a CRC-protected record. Opening the
/// store replays the journal into memory; a torn or corrupt tail left by a
/// crash is truncated so the next append starts on a record boundary.
///
/// # Durability
///
/// - Writes reach the OS immediately
/// - `flush()` calls `File::sync_data()` when `sync_on_flush` is set
///
/// # Compaction
///
/// Overwritten and deleted records are garbage. Once garbage exceeds both
/// `compact_min_garbage` and the live size, the live records are rewritten
/// into a temp file which atomically replaces the journal.
///
/// # Example
///
/// ```no_run
/// use stride_storage::{FileStore, KvStore};
/// use std::path::Path;
///
/// let mut store = FileStore::open(Path::new("outbox.journal")).unwrap();
/// store.put("op/1", b"payload").unwrap();
/// store.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    config: FileStoreConfig,
    file: File,
    entries: BTreeMap<String, Vec<u8>>,
    size: u64,
    live_bytes: u64,
}

impl FileStore {
    /// Opens or creates a journal at `path` with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, locked or read.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_config(path, FileStoreConfig::default())
    }

    /// Opens or creates a journal, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path, config: FileStoreConfig) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open_with_config(path, config)
    }

    /// Opens or creates a journal at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, locked or read.
    pub fn open_with_config(path: &Path, config: FileStoreConfig) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if config.lock {
            lock_exclusive(&file, path)?;
        }

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let replay = replay(&buf);
        if replay.report.trailing_bytes > 0 {
            tracing::warn!(
                path = %path.display(),
                valid_bytes = replay.report.valid_bytes,
                discarded = replay.report.trailing_bytes,
                problem = replay.report.problem.as_deref().unwrap_or("torn write"),
                "truncating damaged journal tail"
            );
            file.set_len(replay.report.valid_bytes)?;
            file.sync_all()?;
        }

        let live_bytes = replay
            .entries
            .iter()
            .map(|(k, v)| JournalRecord::put_size(k, v))
            .sum();

        tracing::debug!(
            path = %path.display(),
            records = replay.report.records,
            live_keys = replay.entries.len(),
            "journal opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            config,
            file,
            entries: replay.entries,
            size: replay.report.valid_bytes,
            live_bytes,
        })
    }

    /// Scans the journal at `path` without modifying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn verify(path: &Path) -> StorageResult<JournalReport> {
        let mut buf = Vec::new();
        File::open(path)?.read_to_end(&mut buf)?;
        Ok(replay(&buf).report)
    }

    /// Returns the path to the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current journal size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the bytes held by superseded records.
    #[must_use]
    pub fn garbage_bytes(&self) -> u64 {
        self.size.saturating_sub(self.live_bytes)
    }

    /// Rewrites the journal so it only holds live records.
    ///
    /// Returns the number of bytes reclaimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the rewrite or the rename fails. On error the
    /// original journal is left untouched.
    pub fn compact(&mut self) -> StorageResult<u64> {
        let before = self.size;
        let tmp_path = self.path.with_extension("compact");

        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            for (key, value) in &self.entries {
                let record = JournalRecord::Put {
                    key: key.clone(),
                    value: value.clone(),
                };
                tmp.write_all(&record.encode()?)?;
            }
            tmp.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        if self.config.lock {
            lock_exclusive(&file, &self.path)?;
        }
        // Dropping the old handle releases its lock
        self.file = file;
        self.size = self.live_bytes;

        let reclaimed = before.saturating_sub(self.size);
        tracing::info!(
            path = %self.path.display(),
            reclaimed,
            live_keys = self.entries.len(),
            "journal compacted"
        );
        Ok(reclaimed)
    }

    fn should_compact(&self) -> bool {
        let garbage = self.garbage_bytes();
        garbage >= self.config.compact_min_garbage && garbage > self.live_bytes
    }

    fn append(&mut self, record: &JournalRecord) -> StorageResult<()> {
        let data = record.encode()?;
        let len = data.len() as u64;

        if let Some(quota) = self.config.max_bytes {
            if self.size + len > quota && self.garbage_bytes() > 0 {
                self.compact()?;
            }
            // Deletes free space, so only puts are refused
            if self.size + len > quota && matches!(record, JournalRecord::Put { .. }) {
                return Err(StorageError::Full {
                    requested: len,
                    quota,
                });
            }
        }

        self.file.seek(SeekFrom::Start(self.size))?;
        if let Err(e) = self.file.write_all(&data) {
            // Drop the partial record so the next append starts clean
            let _ = self.file.set_len(self.size);
            return Err(e.into());
        }
        self.size += len;
        Ok(())
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.append(&JournalRecord::Put {
            key: key.to_string(),
            value: value.to_vec(),
        })?;

        if let Some(previous) = self.entries.insert(key.to_string(), value.to_vec()) {
            self.live_bytes -= JournalRecord::put_size(key, &previous);
        }
        self.live_bytes += JournalRecord::put_size(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        if !self.entries.contains_key(key) {
            return Ok(false);
        }

        self.append(&JournalRecord::Delete {
            key: key.to_string(),
        })?;

        if let Some(previous) = self.entries.remove(key) {
            self.live_bytes -= JournalRecord::put_size(key, &previous);
        }
        Ok(true)
    }

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        if self.config.sync_on_flush {
            self.file.sync_data()?;
        }
        if self.should_compact() {
            self.compact()?;
        }
        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.entries.len())
    }
}

struct Replay {
    entries: BTreeMap<String, Vec<u8>>,
    report: JournalReport,
}

fn replay(buf: &[u8]) -> Replay {
    let mut entries = BTreeMap::new();
    let mut report = JournalReport::default();
    let mut offset = 0usize;

    while offset < buf.len() {
        match JournalRecord::decode(&buf[offset..]) {
            Ok(Some((record, used))) => {
                match record {
                    JournalRecord::Put { key, value } => {
                        entries.insert(key, value);
                    }
                    JournalRecord::Delete { key } => {
                        entries.remove(&key);
                    }
                }
                report.records += 1;
                offset += used;
            }
            Ok(None) => {
                report.problem = Some(format!("incomplete record at offset {offset}"));
                break;
            }
            Err(e) => {
                report.problem = Some(format!("{e} at offset {offset}"));
                break;
            }
        }
    }

    report.live_keys = entries.len();
    report.valid_bytes = offset as u64;
    report.trailing_bytes = (buf.len() - offset) as u64;
    Replay { entries, report }
}

fn lock_exclusive(file: &File, path: &Path) -> StorageResult<()> {
    file.try_lock_exclusive().map_err(|e| {
        if e.kind() == fs2::lock_contended_error().kind() {
            StorageError::Locked {
                path: path.to_path_buf(),
            }
        } else {
            StorageError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn unlocked() -> FileStoreConfig {
        FileStoreConfig::new().lock(false)
    }

    #[test]
    fn config_loads_partial_json() {
        let config: FileStoreConfig =
            serde_json::from_str(r#"{"sync_on_flush": false, "max_bytes": 4096}"#).unwrap();
        assert!(!config.sync_on_flush);
        assert_eq!(config.max_bytes, Some(4096));
        assert!(config.lock);
        assert_eq!(config.compact_min_garbage, 1024 * 1024);
    }

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.journal");

        let store = FileStore::open(&path).unwrap();
        assert!(store.is_empty().unwrap());
        assert_eq!(store.size(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.journal");

        {
            let mut store = FileStore::open(&path).unwrap();
            store.put("op/1", b"first").unwrap();
            store.put("op/2", b"second").unwrap();
            store.delete("op/1").unwrap();
            store.flush().unwrap();
        }

        {
            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.len().unwrap(), 1);
            assert_eq!(store.get("op/1").unwrap(), None);
            assert_eq!(store.get("op/2").unwrap(), Some(b"second".to_vec()));
        }
    }

    #[test]
    fn file_delete_missing_writes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.journal");

        let mut store = FileStore::open(&path).unwrap();
        assert!(!store.delete("nothing").unwrap());
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn file_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.journal");

        let intact_size = {
            let mut store = FileStore::open_with_config(&path, unlocked()).unwrap();
            store.put("op/1", b"kept").unwrap();
            store.flush().unwrap();
            store.size()
        };

        // Simulate a crash halfway through the next append
        let torn = JournalRecord::Put {
            key: "op/2".into(),
            value: b"lost".to_vec(),
        }
        .encode()
        .unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&torn[..torn.len() / 2]).unwrap();
        }

        let report = FileStore::verify(&path).unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.records, 1);

        let mut store = FileStore::open_with_config(&path, unlocked()).unwrap();
        assert_eq!(store.size(), intact_size);
        assert_eq!(store.get("op/1").unwrap(), Some(b"kept".to_vec()));
        assert_eq!(store.get("op/2").unwrap(), None);

        // Appends continue on a record boundary
        store.put("op/3", b"after").unwrap();
        store.flush().unwrap();
        drop(store);
        assert!(FileStore::verify(&path).unwrap().is_clean());
    }

    #[test]
    fn file_compaction_keeps_live_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.journal");

        let mut store = FileStore::open_with_config(&path, unlocked()).unwrap();
        for i in 0..50 {
            store.put("counter", format!("{i}").as_bytes()).unwrap();
        }
        store.put("other", b"x").unwrap();
        assert!(store.garbage_bytes() > 0);

        let reclaimed = store.compact().unwrap();
        assert!(reclaimed > 0);
        assert_eq!(store.garbage_bytes(), 0);
        assert_eq!(store.get("counter").unwrap(), Some(b"49".to_vec()));

        store.put("after", b"compaction").unwrap();
        store.flush().unwrap();
        drop(store);

        let store = FileStore::open_with_config(&path, unlocked()).unwrap();
        assert_eq!(store.len().unwrap(), 3);
        assert_eq!(store.get("after").unwrap(), Some(b"compaction".to_vec()));
    }

    #[test]
    fn file_flush_compacts_past_threshold() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.journal");

        let config = unlocked().compact_min_garbage(64).sync_on_flush(false);
        let mut store = FileStore::open_with_config(&path, config).unwrap();
        for _ in 0..20 {
            store.put("k", b"0123456789").unwrap();
        }
        store.flush().unwrap();
        assert_eq!(store.garbage_bytes(), 0);
        assert_eq!(store.size(), JournalRecord::put_size("k", b"0123456789"));
    }

    #[test]
    fn file_quota_is_enforced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.journal");

        let record_size = JournalRecord::put_size("a", b"1234");
        let config = unlocked().max_bytes(record_size * 2);
        let mut store = FileStore::open_with_config(&path, config).unwrap();

        store.put("a", b"1234").unwrap();
        store.put("b", b"1234").unwrap();
        let result = store.put("c", b"1234");
        assert!(matches!(result, Err(StorageError::Full { .. })));

        // Deletes are always accepted and compaction reclaims the space
        store.delete("b").unwrap();
        store.put("c", b"1234").unwrap();
        assert_eq!(store.get("c").unwrap(), Some(b"1234".to_vec()));
        assert_eq!(store.size(), record_size * 2);
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.journal");

        let _first = FileStore::open(&path).unwrap();
        let second = FileStore::open(&path);
        assert!(matches!(second, Err(StorageError::Locked { .. })));
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("outbox.journal");

        let store = FileStore::open_with_create_dirs(&path, FileStoreConfig::default()).unwrap();
        assert!(store.is_empty().unwrap());
        assert_eq!(store.path(), path);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            Put(String, Vec<u8>),
            Delete(String),
        }

        fn step_strategy() -> impl Strategy<Value = Step> {
            let key = (0..6u8).prop_map(|k| format!("op/{k}"));
            prop_oneof![
                3 => (key.clone(), prop::collection::vec(any::<u8>(), 0..32))
                    .prop_map(|(k, v)| Step::Put(k, v)),
                1 => key.prop_map(Step::Delete),
            ]
        }

        fn apply(store: &mut FileStore, model: &mut BTreeMap<String, Vec<u8>>, steps: &[Step]) {
            for step in steps {
                match step {
                    Step::Put(key, value) => {
                        store.put(key, value).unwrap();
                        model.insert(key.clone(), value.clone());
                    }
                    Step::Delete(key) => {
                        store.delete(key).unwrap();
                        model.remove(key);
                    }
                }
            }
        }

        fn contents(store: &FileStore) -> BTreeMap<String, Vec<u8>> {
            store.scan_prefix("").unwrap().into_iter().collect()
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn reopen_replays_to_the_written_state(
                steps in prop::collection::vec(step_strategy(), 0..40)
            ) {
                let dir = tempdir().unwrap();
                let path = dir.path().join("outbox.journal");
                let config = unlocked().sync_on_flush(false);

                let mut model = BTreeMap::new();
                {
                    let mut store = FileStore::open_with_config(&path, config.clone()).unwrap();
                    apply(&mut store, &mut model, &steps);
                    store.flush().unwrap();
                }

                let store = FileStore::open_with_config(&path, config).unwrap();
                prop_assert_eq!(contents(&store), model);
                prop_assert!(FileStore::verify(&path).unwrap().is_clean());
            }

            #[test]
            fn any_torn_tail_rolls_back_to_the_last_record(
                steps in prop::collection::vec(step_strategy(), 1..20),
                value in prop::collection::vec(any::<u8>(), 0..64),
                cut in any::<prop::sample::Index>(),
            ) {
                let dir = tempdir().unwrap();
                let path = dir.path().join("outbox.journal");
                let config = unlocked().sync_on_flush(false);

                let mut model = BTreeMap::new();
                let intact_size = {
                    let mut store = FileStore::open_with_config(&path, config.clone()).unwrap();
                    apply(&mut store, &mut model, &steps);
                    store.flush().unwrap();
                    store.size()
                };

                let torn = JournalRecord::Put { key: "op/torn".into(), value }
                    .encode()
                    .unwrap();
                let keep = 1 + cut.index(torn.len() - 1);
                {
                    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
                    file.write_all(&torn[..keep]).unwrap();
                }

                let store = FileStore::open_with_config(&path, config).unwrap();
                prop_assert_eq!(store.size(), intact_size);
                prop_assert_eq!(contents(&store), model);
            }
        }
    }
}
