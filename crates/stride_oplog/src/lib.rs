//! # Stride Oplog
//!
//! Durable log of locally-originated mutations awaiting upload.
//!
//! This crate provides:
//! - [`PendingOperation`], the opaque unit the sync engine transports
//! - [`OperationLog`], a FIFO queue persisted through a
//!   [`stride_storage::KvStore`]
//! - The dead-letter record for operations the remote will never accept
//! - [`Clock`] implementations for wall-clock and test time
//!
//! ## Key Invariants
//!
//! - Operation ids are assigned at enqueue, strictly increasing, never reused
//! - An operation leaves the active log only on confirmed delivery or by
//!   moving to the dead-letter record
//! - Every mutation is flushed to the store before the call returns
//! - Counts and reads are served from memory and never touch the store

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod error;
mod log;
mod operation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{LogError, LogResult};
pub use log::OperationLog;
pub use operation::{DeadLetter, DeadLetterReason, LaneKey, PendingOperation};
