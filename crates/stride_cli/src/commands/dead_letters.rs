//! Dead-letters command implementation.

use super::pending::OperationInfo;
use super::{emit, open_log};
use crate::config::CliConfig;
use serde::Serialize;
use std::path::Path;

/// Dead letter representation for output.
#[derive(Debug, Serialize)]
pub struct DeadLetterInfo {
    /// Why the operation was set aside.
    pub reason: String,
    /// Final error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When it was set aside, in unix milliseconds.
    pub dead_lettered_at: u64,
    /// The operation itself.
    pub operation: OperationInfo,
}

/// Lists every dead letter in id order.
pub fn collect(
    path: &Path,
    config: &CliConfig,
) -> Result<Vec<DeadLetterInfo>, Box<dyn std::error::Error>> {
    let log = open_log(path, config)?;
    let now = log.clock().now_millis();
    Ok(log
        .dead_letters()
        .into_iter()
        .map(|letter| DeadLetterInfo {
            reason: letter.reason.to_string(),
            error: letter.error,
            dead_lettered_at: letter.dead_lettered_at,
            operation: OperationInfo::new(&letter.operation, now, config),
        })
        .collect())
}

/// Runs the dead-letters command.
pub fn run(
    path: &Path,
    config: &CliConfig,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let letters = collect(path, config)?;
    emit(format, &letters, || {
        println!("Dead letters ({} total)", letters.len());
        println!("==================");
        println!();
        for letter in &letters {
            let op = &letter.operation;
            print!("[{:>8}] {:20} {}", op.id, op.kind, letter.reason);
            if let Some(entity) = &op.entity {
                print!(" entity={entity}");
            }
            println!(" attempts={}", op.attempts);
            if let Some(error) = &letter.error {
                println!("           error: {error}");
            }
        }
        if !letters.is_empty() {
            println!();
            println!("Use `stride requeue <id>` or `stride discard <id>` to resolve.");
        }
    })
}
