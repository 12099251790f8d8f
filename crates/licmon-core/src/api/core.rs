//! LicenseMonitor: the facade entry-point for the CLI and any other consumer.
//!
//! This struct owns every shared service and exposes high-level methods.
//! Consumers never need to acquire locks or wire services themselves.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::config::Settings;
use crate::monitor::{CycleRunner, SchedulerHandle, SharedThresholds};
use crate::state::SharedPollerState;
use crate::store::{IntervalFile, ThresholdFile};

use super::events::CoreEvent;

/// Default broadcast channel capacity
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The facade that wraps all licmon-core services.
///
/// Constructed via [`LicenseMonitorBuilder`](super::builder::LicenseMonitorBuilder).
pub struct LicenseMonitor {
    /// Application settings
    settings: Arc<Settings>,
    /// Cycle pipeline shared with the scheduler
    runner: Arc<CycleRunner>,
    /// Live threshold configuration
    thresholds: SharedThresholds,
    /// Where thresholds are persisted
    threshold_file: ThresholdFile,
    /// Where a changed poll interval is persisted
    interval_file: IntervalFile,
    /// Scheduler state; the facade writes the interval only while no
    /// scheduler runs
    state: SharedPollerState,
    /// Host-wide poller lock
    lock_path: PathBuf,
    /// Run a cycle as soon as polling starts
    run_on_start: bool,
    /// Running scheduler, if this process is the poller
    scheduler: Mutex<Option<SchedulerHandle>>,
    /// Broadcast sender for core events
    event_tx: broadcast::Sender<CoreEvent>,
}

impl LicenseMonitor {
    /// Create a new instance (prefer `LicenseMonitorBuilder`)
    pub(crate) fn new(
        settings: Arc<Settings>,
        runner: Arc<CycleRunner>,
        thresholds: SharedThresholds,
        threshold_file: ThresholdFile,
        interval_file: IntervalFile,
        state: SharedPollerState,
        lock_path: PathBuf,
        run_on_start: bool,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            settings,
            runner,
            thresholds,
            threshold_file,
            interval_file,
            state,
            lock_path,
            run_on_start,
            scheduler: Mutex::new(None),
            event_tx,
        }
    }

    /// Access application settings (read-only)
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Lock file this instance competes for
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Get a clone of the broadcast event sender
    pub(crate) fn event_sender(&self) -> broadcast::Sender<CoreEvent> {
        self.event_tx.clone()
    }

    // =========================================================
    // Internal accessors for query/action impls
    // =========================================================

    pub(crate) fn runner(&self) -> &Arc<CycleRunner> {
        &self.runner
    }

    pub(crate) fn shared_thresholds(&self) -> &SharedThresholds {
        &self.thresholds
    }

    pub(crate) fn threshold_file(&self) -> &ThresholdFile {
        &self.threshold_file
    }

    pub(crate) fn interval_file(&self) -> &IntervalFile {
        &self.interval_file
    }

    pub(crate) fn state(&self) -> &SharedPollerState {
        &self.state
    }

    pub(crate) fn run_on_start(&self) -> bool {
        self.run_on_start
    }

    pub(crate) fn scheduler(&self) -> &Mutex<Option<SchedulerHandle>> {
        &self.scheduler
    }
}
