use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ChannelKind, DeliveryResult};
use crate::alerts::AlertEvent;

/// Default dispatch log file name inside the data directory
pub const DISPATCH_LOG_FILE: &str = "dispatch.ndjson";

/// What a record was sent for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Alert,
    Report,
    Test,
}

/// One line of the dispatch log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub ts: DateTime<Utc>,
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_value: Option<i64>,
    pub channel: ChannelKind,
    #[serde(flatten)]
    pub result: DeliveryResult,
}

impl DispatchRecord {
    /// Record for an alert delivery
    pub fn alert(event: &AlertEvent, channel: ChannelKind, result: DeliveryResult) -> Self {
        Self {
            ts: Utc::now(),
            kind: RecordKind::Alert,
            entity_id: Some(event.entity_id.clone()),
            metric: Some(event.metric.clone()),
            observed_value: Some(event.observed_value),
            threshold_value: Some(event.threshold_value),
            channel,
            result,
        }
    }

    /// Record for a usage report delivery
    pub fn report(channel: ChannelKind, result: DeliveryResult) -> Self {
        Self {
            ts: Utc::now(),
            kind: RecordKind::Report,
            entity_id: None,
            metric: None,
            observed_value: None,
            threshold_value: None,
            channel,
            result,
        }
    }

    /// Record for a test alert
    pub fn test(entity_id: &str, channel: ChannelKind, result: DeliveryResult) -> Self {
        Self {
            entity_id: Some(entity_id.to_string()),
            kind: RecordKind::Test,
            ..Self::report(channel, result)
        }
    }
}

/// Append-only NDJSON log of delivery results, rotated to `.ndjson.1`
pub struct DispatchLog {
    max_size_bytes: u64,
    file_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl DispatchLog {
    /// Log at `file_path`; the file is opened lazily on first append
    pub fn new(file_path: impl Into<PathBuf>, max_size_bytes: u64) -> Self {
        Self {
            max_size_bytes,
            file_path: file_path.into(),
            writer: None,
        }
    }

    /// Log file location
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Append one record. IO failures are logged, never raised.
    pub fn append(&mut self, record: &DispatchRecord) {
        if self.writer.is_none() {
            self.writer = Self::open_writer(&self.file_path);
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        match serde_json::to_string(record) {
            Ok(json) => {
                if writeln!(writer, "{}", json).and_then(|_| writer.flush()).is_err() {
                    // Reopen on the next call
                    self.writer = None;
                }
            }
            Err(e) => warn!("Failed to serialize dispatch record: {}", e),
        }

        self.maybe_rotate();
    }

    fn open_writer(file_path: &Path) -> Option<BufWriter<File>> {
        if let Some(dir) = file_path.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!("Failed to create dispatch log directory {:?}: {}", dir, e);
                return None;
            }
        }
        match OpenOptions::new().create(true).append(true).open(file_path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                warn!("Failed to open dispatch log {:?}: {}", file_path, e);
                None
            }
        }
    }

    fn maybe_rotate(&mut self) {
        let Ok(metadata) = fs::metadata(&self.file_path) else {
            return;
        };
        if metadata.len() >= self.max_size_bytes {
            self.writer = None;
            let rotated = self.file_path.with_extension("ndjson.1");
            let _ = fs::rename(&self.file_path, &rotated);
            self.writer = Self::open_writer(&self.file_path);
        }
    }
}
