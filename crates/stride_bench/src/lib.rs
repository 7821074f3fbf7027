//! Shared helpers for the Stride benchmarks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::Rng;
use std::sync::Arc;
use stride_engine::{DeliveryError, RemoteEndpoint};
use stride_oplog::{ManualClock, OperationLog, PendingOperation};
use stride_storage::InMemoryStore;

/// Generates random payload bytes of the given size.
pub fn random_payload(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Opens an empty log over an in-memory store.
pub fn memory_log() -> Arc<OperationLog> {
    let clock = Arc::new(ManualClock::new(1_704_067_200_000));
    match OperationLog::open(Box::new(InMemoryStore::new()), clock) {
        Ok(log) => Arc::new(log),
        Err(e) => panic!("in-memory log failed to open: {e}"),
    }
}

/// Fills `log` with `count` operations spread over `entities` lanes.
pub fn fill(log: &OperationLog, count: usize, entities: usize, payload_size: usize) {
    let payload = random_payload(payload_size);
    for n in 0..count {
        let entity = format!("entity-{}", n % entities.max(1));
        if let Err(e) = log.enqueue_for("task.complete", entity, payload.clone()) {
            panic!("enqueue failed: {e}");
        }
    }
}

/// An endpoint that accepts every operation immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl RemoteEndpoint for AcceptAll {
    async fn deliver(&self, _op: &PendingOperation) -> Result<(), DeliveryError> {
        Ok(())
    }
}
