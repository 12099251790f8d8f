//! Snapshot history, one JSON file per snapshot.
//!
//! Files are named `snapshot-<id>.json` where the id is the fixed-width
//! capture timestamp, so lexical order is chronological order.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use super::write_atomic;
use crate::usage::LicenseSnapshot;

const FILE_PREFIX: &str = "snapshot-";
const FILE_SUFFIX: &str = ".json";

/// Snapshot persistence rooted at a directory
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open (and create if needed) the snapshot directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create snapshot directory: {:?}", dir))?;
        Ok(Self { dir })
    }

    /// Directory holding the snapshot files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a snapshot atomically and return its file path
    pub fn save(&self, snapshot: &LicenseSnapshot) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("{}{}{}", FILE_PREFIX, snapshot.id(), FILE_SUFFIX));
        let json = serde_json::to_vec_pretty(snapshot).context("Failed to serialize snapshot")?;
        write_atomic(&path, &json)?;
        Ok(path)
    }

    /// Most recent readable snapshot
    pub fn latest(&self) -> Result<Option<LicenseSnapshot>> {
        Ok(self.history()?.next())
    }

    /// Lazy iterator over stored snapshots, newest first.
    ///
    /// The directory is listed once per call; snapshots are read on demand.
    /// Call again to restart from the newest.
    pub fn history(&self) -> Result<SnapshotHistory> {
        let mut paths = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read snapshot directory: {:?}", self.dir))?;
        for entry in entries {
            let path = entry?.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
                .unwrap_or(false);
            if is_snapshot {
                paths.push(path);
            }
        }
        paths.sort();
        paths.reverse();
        Ok(SnapshotHistory {
            paths: paths.into_iter(),
        })
    }

    /// Up to `limit` snapshots, newest first
    pub fn history_limited(&self, limit: usize) -> Result<Vec<LicenseSnapshot>> {
        Ok(self.history()?.take(limit).collect())
    }
}

/// Newest-first iterator returned by [`SnapshotStore::history`]
pub struct SnapshotHistory {
    paths: std::vec::IntoIter<PathBuf>,
}

impl Iterator for SnapshotHistory {
    type Item = LicenseSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        for path in self.paths.by_ref() {
            match read_snapshot(&path) {
                Ok(snapshot) => return Some(snapshot),
                Err(e) => warn!("Skipping unreadable snapshot {:?}: {:#}", path, e),
            }
        }
        None
    }
}

fn read_snapshot(path: &Path) -> Result<LicenseSnapshot> {
    let content =
        fs::read(path).with_context(|| format!("Failed to read snapshot: {:?}", path))?;
    serde_json::from_slice(&content).with_context(|| format!("Failed to parse snapshot: {:?}", path))
}
