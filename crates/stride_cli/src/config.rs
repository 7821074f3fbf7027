//! Configuration file loading.

use serde::{Deserialize, Serialize};
use std::path::Path;
use stride_engine::EngineConfig;
use stride_storage::FileStoreConfig;

/// Settings read from the `--config` JSON file.
///
/// Every section is optional; missing fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Journal settings.
    pub store: FileStoreConfig,
    /// Engine settings. Only the retry ceiling and the maximum operation
    /// age are used offline, to annotate listings.
    pub engine: EngineConfig,
}

impl CliConfig {
    /// Loads the file at `path`, or the defaults if no path was given.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read config {}: {e}", path.display()))?;
        let config: Self = serde_json::from_str(&text)?;
        config.engine.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}
