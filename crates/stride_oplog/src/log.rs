//! Durable operation log.

use crate::clock::Clock;
use crate::error::{LogError, LogResult};
use crate::operation::{encode_cbor, DeadLetter, DeadLetterReason, PendingOperation};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use stride_storage::KvStore;
use uuid::Uuid;

const OP_PREFIX: &str = "op/";
const DEAD_PREFIX: &str = "dead/";
const NEXT_ID_KEY: &str = "meta/next_id";

fn op_key(id: u64) -> String {
    format!("{OP_PREFIX}{id:020}")
}

fn dead_key(id: u64) -> String {
    format!("{DEAD_PREFIX}{id:020}")
}

#[derive(Debug, Default)]
struct LogCache {
    active: BTreeMap<u64, PendingOperation>,
    dead: BTreeMap<u64, DeadLetter>,
    next_id: u64,
}

/// A durable FIFO of pending operations plus the dead-letter record.
///
/// The log keeps an in-memory mirror of everything in the store so reads,
/// counts and batch peeks never block on I/O. Mutations take the store
/// lock, write and flush, and only then update the mirror, so a crash at
/// any point leaves the store holding every operation the caller was told
/// about.
///
/// # Key Layout
///
/// - `op/{id}` - active operations
/// - `dead/{id}` - dead letters
/// - `meta/next_id` - id high-water mark
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use stride_oplog::{OperationLog, SystemClock};
/// use stride_storage::InMemoryStore;
///
/// let log = OperationLog::open(Box::new(InMemoryStore::new()), Arc::new(SystemClock)).unwrap();
/// let op = log.enqueue("task.complete", b"{}".to_vec()).unwrap();
/// assert_eq!(log.count(), 1);
/// assert!(log.remove(op.id).unwrap());
/// assert!(!log.remove(op.id).unwrap());
/// ```
pub struct OperationLog {
    store: Mutex<Box<dyn KvStore>>,
    cache: RwLock<LogCache>,
    clock: Arc<dyn Clock>,
}

impl OperationLog {
    /// Opens a log over `store`, loading any operations already persisted.
    ///
    /// An id found in both the active and dead-letter namespaces was being
    /// moved when the process stopped; the dead letter wins and the stale
    /// active record is deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or holds a record that
    /// cannot be decoded.
    pub fn open(mut store: Box<dyn KvStore>, clock: Arc<dyn Clock>) -> LogResult<Self> {
        let mut cache = LogCache::default();

        for (key, bytes) in store.scan_prefix(DEAD_PREFIX)? {
            let letter = DeadLetter::decode(&bytes).map_err(|e| LogError::Corrupted {
                key: key.clone(),
                message: e.to_string(),
            })?;
            cache.dead.insert(letter.operation.id, letter);
        }

        let mut interrupted = Vec::new();
        for (key, bytes) in store.scan_prefix(OP_PREFIX)? {
            let op = PendingOperation::decode(&bytes).map_err(|e| LogError::Corrupted {
                key: key.clone(),
                message: e.to_string(),
            })?;
            if cache.dead.contains_key(&op.id) {
                interrupted.push(key);
                continue;
            }
            cache.active.insert(op.id, op);
        }

        if !interrupted.is_empty() {
            tracing::warn!(
                count = interrupted.len(),
                "completing interrupted dead-letter moves"
            );
            for key in &interrupted {
                store.delete(key)?;
            }
            store.flush()?;
        }

        let persisted_next = match store.get(NEXT_ID_KEY)? {
            Some(bytes) => ciborium::from_reader::<u64, _>(bytes.as_slice()).map_err(|e| {
                LogError::Corrupted {
                    key: NEXT_ID_KEY.into(),
                    message: e.to_string(),
                }
            })?,
            None => 1,
        };
        let max_seen = cache
            .active
            .keys()
            .chain(cache.dead.keys())
            .max()
            .copied()
            .unwrap_or(0);
        cache.next_id = persisted_next.max(max_seen + 1);

        tracing::debug!(
            pending = cache.active.len(),
            dead_letters = cache.dead.len(),
            next_id = cache.next_id,
            "operation log opened"
        );

        Ok(Self {
            store: Mutex::new(store),
            cache: RwLock::new(cache),
            clock,
        })
    }

    /// Returns the clock used for timestamps.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Appends an operation with no entity key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is full or cannot be written.
    pub fn enqueue(
        &self,
        kind: impl Into<String>,
        payload: Vec<u8>,
    ) -> LogResult<PendingOperation> {
        self.append(kind.into(), None, payload)
    }

    /// Appends an operation for a logical entity.
    ///
    /// Operations with the same `kind` and `entity` are delivered in the
    /// order they were enqueued.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is full or cannot be written.
    pub fn enqueue_for(
        &self,
        kind: impl Into<String>,
        entity: impl Into<String>,
        payload: Vec<u8>,
    ) -> LogResult<PendingOperation> {
        self.append(kind.into(), Some(entity.into()), payload)
    }

    /// Appends an operation whose payload is `value` encoded as CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the store cannot be written.
    pub fn enqueue_value<T: Serialize>(
        &self,
        kind: impl Into<String>,
        entity: Option<String>,
        value: &T,
    ) -> LogResult<PendingOperation> {
        let payload = encode_cbor(value)?;
        self.append(kind.into(), entity, payload)
    }

    fn append(
        &self,
        kind: String,
        entity: Option<String>,
        payload: Vec<u8>,
    ) -> LogResult<PendingOperation> {
        let mut store = self.store.lock();
        let id = self.cache.read().next_id;

        let op = PendingOperation {
            id,
            kind,
            entity,
            payload,
            idempotency_key: Uuid::new_v4(),
            created_at: self.clock.now_millis(),
            attempts: 0,
            last_error: None,
            not_before: None,
        };

        store.put(NEXT_ID_KEY, &encode_cbor(&(id + 1))?)?;
        store.put(&op_key(id), &op.encode()?)?;
        store.flush()?;

        let mut cache = self.cache.write();
        cache.next_id = id + 1;
        cache.active.insert(id, op.clone());
        drop(cache);

        tracing::debug!(id, kind = %op.kind, "operation enqueued");
        Ok(op)
    }

    /// Returns the oldest `max` operations without removing them.
    pub fn peek_batch(&self, max: usize) -> Vec<PendingOperation> {
        self.peek_batch_after(0, max)
    }

    /// Returns up to `max` operations with an id greater than `after_id`,
    /// oldest first.
    pub fn peek_batch_after(&self, after_id: u64, max: usize) -> Vec<PendingOperation> {
        let cache = self.cache.read();
        cache
            .active
            .range(after_id.saturating_add(1)..)
            .take(max)
            .map(|(_, op)| op.clone())
            .collect()
    }

    /// Returns the operation with `id`, if still pending.
    pub fn get(&self, id: u64) -> Option<PendingOperation> {
        self.cache.read().active.get(&id).cloned()
    }

    /// Returns every pending operation, oldest first.
    pub fn pending(&self) -> Vec<PendingOperation> {
        self.cache.read().active.values().cloned().collect()
    }

    /// Returns the number of pending operations.
    pub fn count(&self) -> usize {
        self.cache.read().active.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.cache.read().active.is_empty()
    }

    /// Removes a delivered operation. Unknown ids are a no-op.
    ///
    /// Returns whether the operation was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn remove(&self, id: u64) -> LogResult<bool> {
        let mut store = self.store.lock();
        if !self.cache.read().active.contains_key(&id) {
            return Ok(false);
        }

        store.delete(&op_key(id))?;
        store.flush()?;
        self.cache.write().active.remove(&id);
        Ok(true)
    }

    /// Records a failed delivery attempt.
    ///
    /// Increments `attempts`, stores `error` and the backoff deadline.
    /// Returns the updated operation, or `None` if it is no longer pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn mark_attempt(
        &self,
        id: u64,
        error: Option<&str>,
        not_before: Option<u64>,
    ) -> LogResult<Option<PendingOperation>> {
        let mut store = self.store.lock();
        let Some(mut op) = self.cache.read().active.get(&id).cloned() else {
            return Ok(None);
        };

        op.attempts = op.attempts.saturating_add(1);
        op.last_error = error.map(String::from);
        op.not_before = not_before;

        store.put(&op_key(id), &op.encode()?)?;
        store.flush()?;
        self.cache.write().active.insert(id, op.clone());
        Ok(Some(op))
    }

    /// Moves a pending operation to the dead-letter record.
    ///
    /// Returns the dead letter, or `None` if the id is no longer pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written. If the process
    /// stops between the two writes, [`OperationLog::open`] completes the move.
    pub fn dead_letter(
        &self,
        id: u64,
        reason: DeadLetterReason,
        error: Option<String>,
    ) -> LogResult<Option<DeadLetter>> {
        let mut store = self.store.lock();
        let Some(op) = self.cache.read().active.get(&id).cloned() else {
            return Ok(None);
        };

        let letter = DeadLetter {
            operation: op,
            reason,
            error,
            dead_lettered_at: self.clock.now_millis(),
        };

        store.put(&dead_key(id), &letter.encode()?)?;
        store.delete(&op_key(id))?;
        store.flush()?;

        let mut cache = self.cache.write();
        cache.active.remove(&id);
        cache.dead.insert(id, letter.clone());
        drop(cache);

        tracing::warn!(
            id,
            kind = %letter.operation.kind,
            reason = %reason,
            error = letter.error.as_deref().unwrap_or(""),
            "operation dead-lettered"
        );
        Ok(Some(letter))
    }

    /// Returns every dead letter, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.cache.read().dead.values().cloned().collect()
    }

    /// Returns the number of dead letters.
    pub fn dead_letter_count(&self) -> usize {
        self.cache.read().dead.len()
    }

    /// Returns a dead letter to the active log.
    ///
    /// The operation gets a fresh id (so it queues behind everything
    /// currently pending), a fresh creation time and a clean attempt
    /// history. Its idempotency key is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn requeue_dead_letter(&self, id: u64) -> LogResult<Option<PendingOperation>> {
        let mut store = self.store.lock();
        let (letter, new_id) = {
            let cache = self.cache.read();
            match cache.dead.get(&id) {
                Some(letter) => (letter.clone(), cache.next_id),
                None => return Ok(None),
            }
        };

        let op = PendingOperation {
            id: new_id,
            created_at: self.clock.now_millis(),
            attempts: 0,
            last_error: None,
            not_before: None,
            ..letter.operation
        };

        store.put(NEXT_ID_KEY, &encode_cbor(&(new_id + 1))?)?;
        store.put(&op_key(new_id), &op.encode()?)?;
        store.delete(&dead_key(id))?;
        store.flush()?;

        let mut cache = self.cache.write();
        cache.next_id = new_id + 1;
        cache.dead.remove(&id);
        cache.active.insert(new_id, op.clone());
        drop(cache);

        tracing::info!(old_id = id, new_id, "dead letter requeued");
        Ok(Some(op))
    }

    /// Permanently drops a dead letter. Unknown ids are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn discard_dead_letter(&self, id: u64) -> LogResult<bool> {
        let mut store = self.store.lock();
        if !self.cache.read().dead.contains_key(&id) {
            return Ok(false);
        }

        store.delete(&dead_key(id))?;
        store.flush()?;
        self.cache.write().dead.remove(&id);
        tracing::info!(id, "dead letter discarded");
        Ok(true)
    }
}

impl std::fmt::Debug for OperationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.read();
        f.debug_struct("OperationLog")
            .field("pending", &cache.active.len())
            .field("dead_letters", &cache.dead.len())
            .field("next_id", &cache.next_id)
            .finish()
    }
}
