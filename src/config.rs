use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

use crate::log_warn;

const ENABLE_LOGS: bool = true;

/// Where and how the exposure store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    /// Ignore `database_path` and keep everything in memory.
    pub in_memory: bool,
    pub enable_wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("exposures.sqlite3"),
            in_memory: false,
            enable_wal: true,
        }
    }
}

impl StoreConfig {
    /// Reads a JSON config file. A missing file gives the defaults, and so
    /// does one that fails to parse.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read store config from {}", path.display()))?;
        match serde_json::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(err) => {
                log_warn!(
                    "Ignoring unparsable store config {}: {err}",
                    path.display()
                );
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write store config to {}", path.display()))
    }
}
