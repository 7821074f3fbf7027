//! # Stride Engine
//!
//! Offline-first sync engine for Stride.
//!
//! This crate provides:
//! - Connectivity monitoring with flap debouncing
//! - A sync executor that drains the operation log with per-lane ordering,
//!   retry with exponential backoff and dead-lettering
//! - A sync coordinator owning the status machine
//!   (idle → syncing → success | error → idle), progress and history
//! - A typed event bus for UI consumers
//! - A remote endpoint abstraction with an HTTP implementation
//!
//! ## Architecture
//!
//! Local mutations are appended to a durable [`stride_oplog::OperationLog`]
//! and delivered later:
//! 1. The coordinator is woken by connectivity, a timer, an enqueue or a
//!    manual trigger
//! 2. If online with work pending, it starts a single run
//! 3. The executor delivers operations lane by lane and records failures
//! 4. The coordinator folds the run report into status, history and events
//!
//! ## Key Invariants
//!
//! - At most one run is in flight
//! - Operations of one `(kind, entity)` lane are delivered in creation order
//! - An operation leaves the log only on acknowledgement or dead-lettering
//! - Delivery failures never escape the executor
//! - Status is derived by the coordinator and cannot be set from outside

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod coordinator;
mod endpoint;
mod error;
mod events;
mod executor;
mod status;

pub use config::{EngineConfig, RetryConfig};
pub use connectivity::{
    spawn_probe_loop, ConnectivityMonitor, ConnectivitySnapshot, ReachabilityProbe, DEFAULT_DWELL,
};
pub use coordinator::{SyncCoordinator, TriggerOutcome};
pub use endpoint::{
    classify_status, HttpClient, HttpEndpoint, HttpRequest, HttpResponse, RemoteEndpoint,
    IDEMPOTENCY_HEADER,
};
pub use error::{DeliveryError, SyncError, SyncResult, TerminalError};
pub use events::{EventBus, EventKind, Subscription, SyncEvent};
pub use executor::{NoopObserver, RunObserver, RunReport, SyncExecutor};
pub use status::{SyncHistoryEntry, SyncStats, SyncStatus};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
