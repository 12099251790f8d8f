//! On-disk persistence: snapshot history, the threshold configuration and
//! the runtime poll interval.
//!
//! Every write goes through [`write_atomic`], so concurrent readers only ever
//! see a complete previous version or a complete new one.

mod interval;
mod snapshots;
mod thresholds;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

pub use interval::IntervalFile;
pub use snapshots::{SnapshotHistory, SnapshotStore};
pub use thresholds::ThresholdFile;

/// Extension used for in-progress writes
const TEMP_EXTENSION: &str = "tmp";

/// Write `bytes` to `path` via a temp file, fsync and rename.
///
/// The temp file is created with O_CREAT|O_EXCL so a planted symlink is
/// never followed.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension(match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{}", ext, TEMP_EXTENSION),
        None => TEMP_EXTENSION.to_string(),
    });

    // Leftover from a previous failed write
    let _ = fs::remove_file(&temp_path);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;

    file.write_all(bytes)
        .with_context(|| format!("Failed to write temp file: {:?}", temp_path))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync temp file: {:?}", temp_path))?;

    fs::rename(&temp_path, path).with_context(|| format!("Failed to rename into {:?}", path))?;
    Ok(())
}
