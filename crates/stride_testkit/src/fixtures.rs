//! Test fixtures for logs and coordinators.
//!
//! Provides convenience functions for setting up operation logs over
//! memory or temp files, and coordinators wired to fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stride_engine::{
    ConnectivityMonitor, EngineConfig, RemoteEndpoint, RetryConfig, SyncCoordinator,
};
use stride_oplog::{ManualClock, OperationLog};
use stride_storage::{FileStore, FileStoreConfig, InMemoryStore};
use tempfile::TempDir;

/// Start time of every fixture clock (2024-01-01T00:00:00Z).
pub const FIXTURE_EPOCH_MILLIS: u64 = 1_704_067_200_000;

enum Backing {
    Memory(InMemoryStore),
    File { _dir: TempDir, path: PathBuf },
}

/// An operation log with a manual clock and a reopenable store.
pub struct TestLog {
    /// The log instance.
    pub log: Arc<OperationLog>,
    /// The clock every reopened log shares.
    pub clock: Arc<ManualClock>,
    backing: Backing,
}

impl TestLog {
    /// Creates a log over an in-memory store.
    pub fn memory() -> Self {
        let store = InMemoryStore::new();
        let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH_MILLIS));
        let log = OperationLog::open(Box::new(store.clone()), clock.clone())
            .expect("Failed to open in-memory log");
        Self {
            log: Arc::new(log),
            clock,
            backing: Backing::Memory(store),
        }
    }

    /// Creates a log over a journal file in a temporary directory.
    pub fn file() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("oplog.journal");
        let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH_MILLIS));
        let log = open_file_log(&path, &clock);
        Self {
            log: Arc::new(log),
            clock,
            backing: Backing::File { _dir: dir, path },
        }
    }

    /// Returns the journal path if file-based.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Memory(_) => None,
            Backing::File { path, .. } => Some(path),
        }
    }

    /// Simulates a process restart: drops the log and opens a new one over
    /// the same store.
    ///
    /// Panics if another clone of the log is still alive, since a file
    /// store cannot be opened twice.
    pub fn restart(&mut self) {
        let fresh = match &self.backing {
            Backing::Memory(store) => {
                OperationLog::open(Box::new(store.clone()), self.clock.clone())
                    .expect("Failed to reopen in-memory log")
            }
            Backing::File { path, .. } => {
                let placeholder = OperationLog::open(
                    Box::new(InMemoryStore::new()),
                    self.clock.clone(),
                )
                .expect("Failed to open placeholder log");
                let old = std::mem::replace(&mut self.log, Arc::new(placeholder));
                assert_eq!(Arc::strong_count(&old), 1, "log still shared");
                drop(old);
                open_file_log(path, &self.clock)
            }
        };
        self.log = Arc::new(fresh);
    }
}

fn open_file_log(path: &Path, clock: &Arc<ManualClock>) -> OperationLog {
    let store = FileStore::open_with_config(path, FileStoreConfig::default())
        .expect("Failed to open journal");
    OperationLog::open(Box::new(store), clock.clone()).expect("Failed to open file log")
}

/// Engine configuration for deterministic tests: no jitter, a one second
/// display window and no sync on enqueue.
pub fn test_config() -> EngineConfig {
    EngineConfig::new()
        .with_retry(
            RetryConfig::new(10)
                .with_initial_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(60))
                .with_jitter(false),
        )
        .with_storage_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(10))
                .with_jitter(false),
        )
        .with_display_window(Duration::from_secs(1))
        .with_sync_on_enqueue(false)
}

/// A coordinator wired to a fake endpoint, a zero-dwell monitor and a
/// manual clock.
pub struct TestHarness<E: RemoteEndpoint + 'static> {
    /// The coordinator under test.
    pub coordinator: SyncCoordinator<Arc<E>>,
    /// The fake endpoint.
    pub endpoint: Arc<E>,
    /// The connectivity monitor.
    pub monitor: ConnectivityMonitor,
    /// The log fixture.
    pub log: TestLog,
}

impl<E: RemoteEndpoint + 'static> TestHarness<E> {
    /// Builds a harness with [`test_config`]. Must be called inside a
    /// tokio runtime.
    pub fn new(endpoint: E) -> Self {
        Self::with_config(endpoint, test_config())
    }

    /// Builds a harness with a custom configuration.
    pub fn with_config(endpoint: E, config: EngineConfig) -> Self {
        let log = TestLog::memory();
        let monitor = ConnectivityMonitor::with_dwell(log.clock.clone(), Duration::ZERO);
        let endpoint = Arc::new(endpoint);
        let coordinator = SyncCoordinator::new(
            log.log.clone(),
            monitor.clone(),
            Arc::clone(&endpoint),
            config,
        )
        .expect("Failed to build coordinator");
        Self {
            coordinator,
            endpoint,
            monitor,
            log,
        }
    }

    /// Returns the manual clock.
    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.log.clock
    }

    /// Advances both the manual clock and paused tokio time by `by`.
    pub async fn advance(&self, by: Duration) {
        self.log.clock.advance(by);
        tokio::time::sleep(by).await;
    }
}
