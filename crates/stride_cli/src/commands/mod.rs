//! CLI command implementations.

pub mod compact;
pub mod dead_letters;
pub mod pending;
pub mod resolve;
pub mod stats;
pub mod verify;

use crate::config::CliConfig;
use std::path::Path;
use std::sync::Arc;
use stride_oplog::{OperationLog, SystemClock};
use stride_storage::FileStore;

/// Opens the log stored in the journal at `path`.
pub fn open_log(
    path: &Path,
    config: &CliConfig,
) -> Result<OperationLog, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("Journal not found: {}", path.display()).into());
    }
    let store = FileStore::open_with_config(path, config.store.clone())?;
    Ok(OperationLog::open(Box::new(store), Arc::new(SystemClock))?)
}

/// Prints `items` as pretty JSON when `format` is `json`, otherwise calls
/// `text`.
pub fn emit<T: serde::Serialize + ?Sized>(
    format: &str,
    items: &T,
    text: impl FnOnce(),
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(items)?),
        _ => text(),
    }
    Ok(())
}
