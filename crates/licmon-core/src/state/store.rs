use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shared poller state; written by the scheduler task, and by the facade
/// for the interval while no scheduler runs
pub type SharedPollerState = Arc<RwLock<PollerState>>;

/// Scheduler lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerPhase {
    /// Not polling
    #[default]
    Idle,
    /// Trying to take the host-wide lock
    AcquiringLock,
    /// Lock held, cycles running on schedule
    Running,
    /// Finishing up before releasing the lock
    Stopping,
    /// Another poller holds the lock
    Failed,
}

impl PollerPhase {
    /// Lowercase label for display
    pub fn as_str(&self) -> &'static str {
        match self {
            PollerPhase::Idle => "idle",
            PollerPhase::AcquiringLock => "acquiring_lock",
            PollerPhase::Running => "running",
            PollerPhase::Stopping => "stopping",
            PollerPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PollerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of the last cycle failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Auth,
    Command,
    Parse,
    Store,
    Lock,
    /// Cycle task panicked or was cancelled
    Internal,
}

/// Last failure, in a form safe to show to users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
    /// Needs operator attention (bad credentials, unexpected output)
    pub elevated: bool,
}

/// Observable scheduler state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerState {
    pub phase: PollerPhase,
    pub interval_secs: u64,
    pub lock_held: bool,
    pub lock_path: Option<PathBuf>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub cycles_completed: u64,
    pub cycle_in_flight: bool,
}

impl PollerState {
    /// Idle state for the given interval
    pub fn new(interval_secs: u64) -> Self {
        Self {
            phase: PollerPhase::Idle,
            interval_secs,
            lock_held: false,
            lock_path: None,
            last_cycle_at: None,
            last_error: None,
            cycles_completed: 0,
            cycle_in_flight: false,
        }
    }

    /// Create a shared state
    pub fn shared(interval_secs: u64) -> SharedPollerState {
        Arc::new(RwLock::new(Self::new(interval_secs)))
    }

    /// True while this process owns the polling lock and cycles run
    pub fn is_running(&self) -> bool {
        self.phase == PollerPhase::Running
    }
}
