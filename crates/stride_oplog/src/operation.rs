//! Pending operations and dead letters.

use crate::error::{LogError, LogResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A locally-originated mutation waiting to be delivered.
///
/// The engine never interprets `kind` or `payload`; `kind` names the remote
/// endpoint and `payload` is whatever the caller serialized.
///
/// # Fields
///
/// - `id`: Log-assigned, strictly increasing, never reused
/// - `kind`: Remote endpoint/table tag, e.g. `"task.complete"`
/// - `entity`: Logical record key; operations sharing `(kind, entity)` are
///   delivered in creation order
/// - `idempotency_key`: Stable across retries and restarts so the remote can
///   merge duplicate deliveries
/// - `not_before`: Backoff deadline in unix milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Log-assigned id.
    pub id: u64,
    /// Endpoint tag.
    pub kind: String,
    /// Logical entity key.
    pub entity: Option<String>,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Key sent with every delivery attempt.
    pub idempotency_key: Uuid,
    /// Creation time in unix milliseconds.
    pub created_at: u64,
    /// Number of failed delivery attempts.
    pub attempts: u32,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Earliest time of the next attempt, in unix milliseconds.
    pub not_before: Option<u64>,
}

impl PendingOperation {
    /// Returns the ordering lane of this operation.
    pub fn lane(&self) -> LaneKey {
        LaneKey {
            kind: self.kind.clone(),
            entity: self.entity.clone(),
        }
    }

    /// Returns true if backoff allows an attempt at `now`.
    pub fn is_ready(&self, now: u64) -> bool {
        self.not_before.map_or(true, |at| at <= now)
    }

    /// Returns the age of the operation at `now` in milliseconds.
    pub fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    /// Decodes a CBOR payload written by [`crate::OperationLog::enqueue_value`].
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Codec`] if the payload is not valid CBOR for `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> LogResult<T> {
        ciborium::from_reader(self.payload.as_slice()).map_err(LogError::codec)
    }

    pub(crate) fn encode(&self) -> LogResult<Vec<u8>> {
        encode_cbor(self)
    }

    pub(crate) fn decode(bytes: &[u8]) -> LogResult<Self> {
        ciborium::from_reader(bytes).map_err(LogError::codec)
    }
}

/// Ordering lane: operations in the same lane are delivered in id order.
///
/// Operations without an entity share the lane of their kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneKey {
    /// Endpoint tag.
    pub kind: String,
    /// Logical entity key.
    pub entity: Option<String>,
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity {
            Some(entity) => write!(f, "{}:{}", self.kind, entity),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Why an operation was set aside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeadLetterReason {
    /// The remote rejected the payload as invalid.
    Rejected,
    /// The remote reported a conflict it cannot resolve.
    Conflict,
    /// Retryable failures reached the retry ceiling.
    RetriesExhausted,
    /// The operation outlived the maximum age.
    Expired,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeadLetterReason::Rejected => "rejected",
            DeadLetterReason::Conflict => "conflict",
            DeadLetterReason::RetriesExhausted => "retries exhausted",
            DeadLetterReason::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A permanently failed operation awaiting user resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The abandoned operation, as it was when abandoned.
    pub operation: PendingOperation,
    /// Why it was abandoned.
    pub reason: DeadLetterReason,
    /// Final error message.
    pub error: Option<String>,
    /// When it was abandoned, in unix milliseconds.
    pub dead_lettered_at: u64,
}

impl DeadLetter {
    pub(crate) fn encode(&self) -> LogResult<Vec<u8>> {
        encode_cbor(self)
    }

    pub(crate) fn decode(bytes: &[u8]) -> LogResult<Self> {
        ciborium::from_reader(bytes).map_err(LogError::codec)
    }
}

pub(crate) fn encode_cbor<T: Serialize + ?Sized>(value: &T) -> LogResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(LogError::codec)?;
    Ok(buf)
}
