//! Key-value store trait definition.

use crate::error::StorageResult;

/// A key-value persistence substrate.
///
/// Stores are **opaque record stores**. The operation log owns the key
/// layout and the value encoding; stores only keep bytes under keys.
///
/// # Invariants
///
/// - `get` returns exactly the bytes most recently `put` under that key
/// - `delete` of a missing key is a no-op returning `Ok(false)`
/// - `scan_prefix` returns entries ordered by key
/// - `flush` makes every previous write durable
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KvStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying medium cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is full or an I/O error occurs.
    fn put(&mut self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `key`. Returns whether a value was present.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn delete(&mut self, key: &str) -> StorageResult<bool>;

    /// Returns all entries whose key starts with `prefix`, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying medium cannot be read.
    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Makes all previous writes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the number of live keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the count cannot be determined.
    fn len(&self) -> StorageResult<usize>;

    /// Returns true if the store holds no keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the count cannot be determined.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl<S: KvStore + ?Sized> KvStore for Box<S> {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&mut self, key: &str, value: &[u8]) -> StorageResult<()> {
        (**self).put(key, value)
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        (**self).delete(key)
    }

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        (**self).scan_prefix(prefix)
    }

    fn flush(&mut self) -> StorageResult<()> {
        (**self).flush()
    }

    fn len(&self) -> StorageResult<usize> {
        (**self).len()
    }
}
