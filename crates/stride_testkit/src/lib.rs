//! # Stride Testkit
//!
//! Test utilities for the Stride sync engine.
//!
//! This crate provides:
//! - Scripted and idempotent fake remote endpoints
//! - A fault-injecting key-value store
//! - A scripted reachability probe
//! - Fixtures for logs and coordinators over memory or temp files
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stride_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn drains_when_online() {
//!     let harness = TestHarness::new(ScriptedEndpoint::new());
//!     harness.coordinator.enqueue("task.complete", None, vec![]).unwrap();
//!     let report = harness.coordinator.sync_now().await.unwrap();
//!     assert!(report.is_clean());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod endpoints;
pub mod fixtures;
pub mod generators;
pub mod probe;
pub mod storage;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::endpoints::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::probe::*;
    pub use crate::storage::*;
}

pub use endpoints::*;
pub use fixtures::*;
pub use generators::*;
pub use probe::*;
pub use storage::*;
