//! Poll interval chosen at runtime, kept across restarts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::write_atomic;

#[derive(Debug, Serialize, Deserialize)]
struct SavedInterval {
    interval_secs: u64,
}

/// JSON file holding the last interval set through the facade
#[derive(Debug, Clone)]
pub struct IntervalFile {
    path: PathBuf,
}

impl IntervalFile {
    /// Default file name inside the data directory
    pub const FILE_NAME: &'static str = "poller.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Interval file inside `data_dir`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(Self::FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved interval, `None` if it was never changed
    pub fn load(&self) -> Result<Option<u64>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read interval file: {:?}", self.path))?;
        let saved: SavedInterval = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse interval file: {:?}", self.path))?;
        Ok(Some(saved.interval_secs))
    }

    pub fn save(&self, interval_secs: u64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let json = serde_json::to_vec_pretty(&SavedInterval { interval_secs })
            .context("Failed to serialize poll interval")?;
        write_atomic(&self.path, &json)
    }
}
