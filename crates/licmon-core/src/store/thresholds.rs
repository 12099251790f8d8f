//! Threshold configuration persisted as a single JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use super::write_atomic;
use crate::alerts::ThresholdConfig;

/// JSON file holding the [`ThresholdConfig`]
#[derive(Debug, Clone)]
pub struct ThresholdFile {
    path: PathBuf,
}

impl ThresholdFile {
    /// Default file name inside the data directory
    pub const FILE_NAME: &'static str = "thresholds.json";

    /// Threshold file at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Threshold file inside `data_dir`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(Self::FILE_NAME))
    }

    /// File location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration; a missing file yields an empty one
    pub fn load(&self) -> Result<ThresholdConfig> {
        if !self.path.exists() {
            debug!("No threshold file at {:?}, starting empty", self.path);
            return Ok(ThresholdConfig::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read threshold file: {:?}", self.path))?;
        let config: ThresholdConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse threshold file: {:?}", self.path))?;
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid threshold file {:?}: {}", self.path, e))?;
        Ok(config)
    }

    /// Replace the file contents atomically
    pub fn save(&self, config: &ThresholdConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let json =
            serde_json::to_vec_pretty(config).context("Failed to serialize threshold config")?;
        write_atomic(&self.path, &json)
    }
}
