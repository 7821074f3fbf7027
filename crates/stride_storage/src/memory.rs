//! In-memory key-value store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::KvStore;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<String, Vec<u8>>,
    bytes: u64,
    quota: Option<u64>,
}

/// An in-memory key-value store.
///
/// Clones share the same underlying map, which lets a test drop an
/// operation log and reopen a new one over the "surviving" store to
/// simulate a process restart.
///
/// # Example
///
/// ```rust
/// use stride_storage::{InMemoryStore, KvStore};
///
/// let mut store = InMemoryStore::new();
/// let survivor = store.clone();
/// store.put("k", b"v").unwrap();
/// assert_eq!(survivor.len().unwrap(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that rejects writes once `quota` bytes of keys and
    /// values are held.
    #[must_use]
    pub fn with_quota(quota: u64) -> Self {
        let store = Self::default();
        store.state.write().quota = Some(quota);
        store
    }

    /// Returns the number of key and value bytes currently held.
    #[must_use]
    pub fn bytes_used(&self) -> u64 {
        self.state.read().bytes
    }

    /// Returns a copy of every entry.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.state.read().entries.clone()
    }

    /// Clears all data from the store.
    pub fn clear(&mut self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.bytes = 0;
    }
}

fn entry_size(key: &str, value: &[u8]) -> u64 {
    (key.len() + value.len()) as u64
}

impl KvStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.state.read().entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> StorageResult<()> {
        let mut state = self.state.write();
        let previous = state
            .entries
            .get(key)
            .map(|v| entry_size(key, v))
            .unwrap_or(0);
        let incoming = entry_size(key, value);
        let projected = state.bytes - previous + incoming;

        if let Some(quota) = state.quota {
            if projected > quota {
                return Err(StorageError::Full {
                    requested: incoming,
                    quota,
                });
            }
        }

        state.entries.insert(key.to_string(), value.to_vec());
        state.bytes = projected;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        let mut state = self.state.write();
        match state.entries.remove(key) {
            Some(value) => {
                state.bytes -= entry_size(key, &value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let state = self.state.read();
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&mut self) -> StorageResult<()> {
        // Nothing is buffered
        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.state.read().entries.len())
    }
}
