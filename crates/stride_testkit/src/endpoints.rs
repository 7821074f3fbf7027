//! Fake remote endpoints.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stride_engine::{DeliveryError, RemoteEndpoint};
use stride_oplog::PendingOperation;
use uuid::Uuid;

/// One call to a fake endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Operation id.
    pub id: u64,
    /// Operation kind.
    pub kind: String,
    /// Operation entity.
    pub entity: Option<String>,
    /// Idempotency key sent with the call.
    pub idempotency_key: Uuid,
    /// Prior attempts recorded on the operation.
    pub attempts: u32,
    /// Whether the call reported success.
    pub succeeded: bool,
}

/// An endpoint that answers from a script.
///
/// Each call takes the next scripted result; when the script is empty it
/// falls back to a per-kind result, then to the default (`Ok` unless
/// changed).
pub struct ScriptedEndpoint {
    script: Mutex<VecDeque<Result<(), DeliveryError>>>,
    per_kind: Mutex<HashMap<String, Result<(), DeliveryError>>>,
    fallback: Mutex<Result<(), DeliveryError>>,
    latency: Mutex<Duration>,
    deliveries: Mutex<Vec<Delivery>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedEndpoint {
    /// Creates an endpoint that accepts everything.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            per_kind: Mutex::new(HashMap::new()),
            fallback: Mutex::new(Ok(())),
            latency: Mutex::new(Duration::ZERO),
            deliveries: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Creates an endpoint that always answers `result`.
    pub fn always(result: Result<(), DeliveryError>) -> Self {
        let endpoint = Self::new();
        endpoint.set_fallback(result);
        endpoint
    }

    /// Appends one scripted result.
    pub fn push(&self, result: Result<(), DeliveryError>) -> &Self {
        self.script.lock().push_back(result);
        self
    }

    /// Appends `count` copies of a scripted result.
    pub fn push_n(&self, result: Result<(), DeliveryError>, count: usize) -> &Self {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.push_back(result.clone());
        }
        self
    }

    /// Answers `result` for every operation of `kind` once the script is empty.
    pub fn answer_kind(&self, kind: impl Into<String>, result: Result<(), DeliveryError>) {
        self.per_kind.lock().insert(kind.into(), result);
    }

    /// Changes the default answer.
    pub fn set_fallback(&self, result: Result<(), DeliveryError>) {
        *self.fallback.lock() = result;
    }

    /// Delays every answer by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Returns every call made so far.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Returns ids of operations answered with success, in answer order.
    pub fn delivered_ids(&self) -> Vec<u64> {
        self.deliveries
            .lock()
            .iter()
            .filter(|d| d.succeeded)
            .map(|d| d.id)
            .collect()
    }

    /// Returns the number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// Returns the highest number of concurrent calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn answer(&self, kind: &str) -> Result<(), DeliveryError> {
        if let Some(result) = self.script.lock().pop_front() {
            return result;
        }
        if let Some(result) = self.per_kind.lock().get(kind) {
            return result.clone();
        }
        self.fallback.lock().clone()
    }
}

impl Default for ScriptedEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteEndpoint for ScriptedEndpoint {
    async fn deliver(&self, op: &PendingOperation) -> Result<(), DeliveryError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let result = self.answer(&op.kind);
        self.deliveries.lock().push(Delivery {
            id: op.id,
            kind: op.kind.clone(),
            entity: op.entity.clone(),
            idempotency_key: op.idempotency_key,
            attempts: op.attempts,
            succeeded: result.is_ok(),
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// A record applied by [`IdempotentRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRecord {
    /// Idempotency key of the first delivery.
    pub idempotency_key: Uuid,
    /// Operation kind.
    pub kind: String,
    /// Operation entity.
    pub entity: Option<String>,
    /// Payload as first received.
    pub payload: Vec<u8>,
}

/// A remote store that merges duplicate deliveries by idempotency key.
///
/// It can be told to lose acknowledgements: the write is applied but the
/// caller sees a network error, which is how duplicates arise in practice.
#[derive(Default)]
pub struct IdempotentRemote {
    applied: Mutex<Vec<AppliedRecord>>,
    seen: Mutex<HashSet<Uuid>>,
    receipts: AtomicUsize,
    lost_acks: AtomicUsize,
}

impl IdempotentRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the next `count` deliveries but reports them as failed.
    pub fn lose_next_acks(&self, count: usize) {
        self.lost_acks.store(count, Ordering::SeqCst);
    }

    /// Returns applied records in apply order.
    pub fn applied(&self) -> Vec<AppliedRecord> {
        self.applied.lock().clone()
    }

    /// Returns the number of deliveries received, duplicates included.
    pub fn receipt_count(&self) -> usize {
        self.receipts.load(Ordering::SeqCst)
    }

    /// Returns the number of duplicate deliveries that were merged.
    pub fn duplicate_count(&self) -> usize {
        self.receipt_count() - self.applied.lock().len()
    }
}

impl RemoteEndpoint for IdempotentRemote {
    async fn deliver(&self, op: &PendingOperation) -> Result<(), DeliveryError> {
        self.receipts.fetch_add(1, Ordering::SeqCst);
        if self.seen.lock().insert(op.idempotency_key) {
            self.applied.lock().push(AppliedRecord {
                idempotency_key: op.idempotency_key,
                kind: op.kind.clone(),
                entity: op.entity.clone(),
                payload: op.payload.clone(),
            });
        }

        let lose = self
            .lost_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lose {
            return Err(DeliveryError::Network("acknowledgement lost".into()));
        }
        Ok(())
    }
}
