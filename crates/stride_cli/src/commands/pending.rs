//! Pending command implementation.

use super::{emit, open_log};
use crate::config::CliConfig;
use serde::Serialize;
use std::path::Path;
use stride_oplog::PendingOperation;

/// Pending operation representation for output.
#[derive(Debug, Serialize)]
pub struct OperationInfo {
    /// Log-assigned id.
    pub id: u64,
    /// Endpoint tag.
    pub kind: String,
    /// Entity key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Idempotency key sent with each attempt.
    pub idempotency_key: String,
    /// Creation time in unix milliseconds.
    pub created_at: u64,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// Last failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Backoff deadline in unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<u64>,
    /// Whether the next run would dead-letter it for age.
    pub expired: bool,
}

impl OperationInfo {
    /// Describes `op` as seen at `now`.
    pub fn new(op: &PendingOperation, now: u64, config: &CliConfig) -> Self {
        let expired = config
            .engine
            .max_operation_age
            .is_some_and(|max| u128::from(op.age_millis(now)) > max.as_millis());
        Self {
            id: op.id,
            kind: op.kind.clone(),
            entity: op.entity.clone(),
            idempotency_key: op.idempotency_key.to_string(),
            created_at: op.created_at,
            attempts: op.attempts,
            payload_size: op.payload.len(),
            last_error: op.last_error.clone(),
            not_before: op.not_before,
            expired,
        }
    }
}

/// Lists up to `limit` pending operations in delivery order.
pub fn collect(
    path: &Path,
    config: &CliConfig,
    limit: Option<usize>,
) -> Result<Vec<OperationInfo>, Box<dyn std::error::Error>> {
    let log = open_log(path, config)?;
    let now = log.clock().now_millis();
    Ok(log
        .peek_batch(limit.unwrap_or(usize::MAX))
        .iter()
        .map(|op| OperationInfo::new(op, now, config))
        .collect())
}

/// Runs the pending command.
pub fn run(
    path: &Path,
    config: &CliConfig,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let ops = collect(path, config, limit)?;
    emit(format, &ops, || print_text_output(&ops))
}

fn print_text_output(ops: &[OperationInfo]) {
    println!("Pending operations ({} shown)", ops.len());
    println!("==========================");
    println!();

    for op in ops {
        print!("[{:>8}] {:20}", op.id, op.kind);
        if let Some(entity) = &op.entity {
            print!(" entity={entity}");
        }
        print!(" attempts={} size={}", op.attempts, op.payload_size);
        if op.expired {
            print!(" EXPIRED");
        }
        println!();
        if let Some(error) = &op.last_error {
            println!("           last error: {error}");
        }
    }
}
