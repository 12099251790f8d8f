//! Owned result and error types for the facade API.

use serde::Serialize;
use thiserror::Error;

use crate::monitor::{CycleError, LockError};
use crate::notify::DispatchError;

/// Error type for facade operations
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid input (bad entity id, interval too short)
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// This process is not the active poller
    #[error("poller is not running")]
    NotRunning,

    /// The scheduler task stopped before answering
    #[error("scheduler unavailable")]
    SchedulerUnavailable,

    /// Reading or writing the data directory failed
    #[error("storage error: {0:#}")]
    Store(#[from] anyhow::Error),

    /// A notification could not be delivered
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A one-off cycle failed
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// The poller lock is held elsewhere (or unusable)
    #[error(transparent)]
    Lock(#[from] LockError),

    /// A background task panicked or was cancelled
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Answer to a manual cycle request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ManualCycle {
    /// Queued; runs as soon as the scheduler picks it up
    Accepted,
    Rejected(RejectReason),
}

/// Why a manual cycle was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// A cycle is in flight or a refresh is already queued
    AlreadyRunning,
    /// This process does not hold the poller lock
    NotRunning,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::AlreadyRunning => f.write_str("a cycle is already running"),
            RejectReason::NotRunning => f.write_str("poller is not running"),
        }
    }
}

/// Result of [`LicenseMonitor::start_polling`](super::LicenseMonitor::start_polling)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// This process holds the lock and polls
    Running,
    /// Another process polls (or the lock file is unusable)
    Failed { reason: String },
}

impl StartOutcome {
    pub fn is_running(&self) -> bool {
        matches!(self, StartOutcome::Running)
    }
}
