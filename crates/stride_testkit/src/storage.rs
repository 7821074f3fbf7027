//! Fault-injecting key-value store.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use stride_storage::{InMemoryStore, KvStore, StorageError, StorageResult};

/// Kind of failure injected by [`FaultyStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Transient failure; retrying may succeed.
    Unavailable,
    /// Disk full.
    Full,
    /// Corrupted medium.
    Corrupted,
}

impl Fault {
    fn to_error(self) -> StorageError {
        match self {
            Fault::Unavailable => StorageError::Unavailable("injected fault".into()),
            Fault::Full => StorageError::Full {
                requested: 0,
                quota: 0,
            },
            Fault::Corrupted => StorageError::Corrupted("injected fault".into()),
        }
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    fault: Option<Fault>,
    remaining: Option<usize>,
}

/// Control handle shared between a [`FaultyStore`] and the test.
#[derive(Debug, Clone, Default)]
pub struct FaultSwitch {
    plan: Arc<Mutex<FaultPlan>>,
    failures: Arc<AtomicUsize>,
}

impl FaultSwitch {
    /// Fails the next `count` writes with `fault`.
    pub fn fail_next(&self, fault: Fault, count: usize) {
        *self.plan.lock() = FaultPlan {
            fault: Some(fault),
            remaining: Some(count),
        };
    }

    /// Fails every write with `fault` until [`FaultSwitch::heal`].
    pub fn fail_always(&self, fault: Fault) {
        *self.plan.lock() = FaultPlan {
            fault: Some(fault),
            remaining: None,
        };
    }

    /// Stops injecting faults.
    pub fn heal(&self) {
        *self.plan.lock() = FaultPlan::default();
    }

    /// Returns the number of writes failed so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self) -> StorageResult<()> {
        let mut plan = self.plan.lock();
        let Some(fault) = plan.fault else {
            return Ok(());
        };
        match plan.remaining {
            Some(0) => {
                *plan = FaultPlan::default();
                return Ok(());
            }
            Some(n) => plan.remaining = Some(n - 1),
            None => {}
        }
        self.failures.fetch_add(1, Ordering::SeqCst);
        Err(fault.to_error())
    }
}

/// An [`InMemoryStore`] whose writes fail on command.
///
/// Reads always succeed. `put`, `delete` and `flush` consult the switch.
#[derive(Debug, Clone, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    switch: FaultSwitch,
}

impl FaultyStore {
    /// Creates a store over an empty in-memory map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing store.
    pub fn wrap(inner: InMemoryStore) -> Self {
        Self {
            inner,
            switch: FaultSwitch::default(),
        }
    }

    /// Returns the control handle.
    pub fn switch(&self) -> FaultSwitch {
        self.switch.clone()
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }
}

impl KvStore for FaultyStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&mut self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.switch.check()?;
        self.inner.put(key, value)
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        self.switch.check()?;
        self.inner.delete(key)
    }

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        self.inner.scan_prefix(prefix)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.switch.check()?;
        self.inner.flush()
    }

    fn len(&self) -> StorageResult<usize> {
        self.inner.len()
    }
}
