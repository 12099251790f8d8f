//! Action methods on [`LicenseMonitor`].
//!
//! These methods start and reconfigure the scheduler, edit thresholds and
//! send notifications on demand.

use std::sync::Arc;

use tracing::info;

use crate::alerts::{validate_entity_id, EntityThreshold, ThresholdConfig};
use crate::config::MIN_INTERVAL_SECS;
use crate::monitor::{CycleReport, Scheduler, SingletonLock};
use crate::notify::ChannelKind;
use crate::state::PollerPhase;

use super::core::LicenseMonitor;
use super::events::CoreEvent;
use super::types::{ApiError, ManualCycle, RejectReason, StartOutcome};

impl LicenseMonitor {
    // =========================================================
    // Scheduler lifecycle
    // =========================================================

    /// Try to become the host's poller and start the schedule.
    ///
    /// Returns `Failed` when another process holds the lock; nothing is
    /// polled in that case. Calling it again after a failure retries.
    /// Must be called inside a tokio runtime.
    pub fn start_polling(&self) -> StartOutcome {
        let mut slot = self.scheduler().lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return StartOutcome::Running;
        }
        *slot = None;

        let scheduler = Scheduler::new(
            self.runner().clone(),
            self.shared_thresholds().clone(),
            self.state().clone(),
            self.lock_path().to_path_buf(),
        )
        .with_run_on_start(self.run_on_start())
        .with_event_tx(self.event_sender());

        match scheduler.start() {
            Ok(handle) => {
                *slot = Some(handle);
                StartOutcome::Running
            }
            Err(e) => StartOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    /// Stop polling and release the lock. No-op when not polling.
    pub async fn shutdown(&self) {
        let handle = self.scheduler().lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
            info!("Poller shut down");
        }
    }

    /// Ask for a cycle now
    pub fn trigger_manual_cycle(&self) -> ManualCycle {
        match self.scheduler().lock().as_ref() {
            Some(handle) => handle.request_refresh(self.state()),
            None => ManualCycle::Rejected(RejectReason::NotRunning),
        }
    }

    /// Change the poll interval.
    ///
    /// The value is saved to the data directory first, so later runs start
    /// with it. While polling, the scheduler stops, releases the lock and
    /// takes it again with the new interval; `NotRunning` means the lock was
    /// lost during that handoff. While not polling, the next
    /// [`start_polling`](Self::start_polling) uses it.
    pub async fn update_interval(&self, secs: u64) -> Result<(), ApiError> {
        if secs < MIN_INTERVAL_SECS {
            return Err(ApiError::InvalidInput {
                message: format!("interval must be at least {}s", MIN_INTERVAL_SECS),
            });
        }
        self.interval_file().save(secs)?;

        let control = {
            let slot = self.scheduler().lock();
            match slot.as_ref().filter(|h| !h.is_finished()) {
                Some(handle) => handle.control(),
                None => {
                    // Holding the slot keeps start_polling out until the state is set
                    self.state().write().interval_secs = secs;
                    info!("Poll interval set to {}s (not polling)", secs);
                    return Ok(());
                }
            }
        };

        match control.update_interval(secs).await {
            Some(PollerPhase::Running) => {
                info!("Poll interval set to {}s", secs);
                Ok(())
            }
            Some(_) => Err(ApiError::NotRunning),
            None => Err(ApiError::SchedulerUnavailable),
        }
    }

    // =========================================================
    // Thresholds
    // =========================================================

    /// Replace the whole threshold configuration.
    ///
    /// Persisted before it takes effect; the next cycle uses it.
    pub fn update_thresholds(&self, config: ThresholdConfig) -> Result<(), ApiError> {
        self.edit_thresholds(|current| {
            *current = config;
            Ok(())
        })
    }

    /// Add or replace the threshold of one entity
    pub fn set_entity_threshold(
        &self,
        entity_id: &str,
        threshold: EntityThreshold,
    ) -> Result<(), ApiError> {
        validate_entity_id(entity_id).map_err(|message| ApiError::InvalidInput { message })?;
        self.edit_thresholds(|config| {
            config.insert(entity_id, threshold);
            Ok(())
        })
    }

    /// Remove the threshold of one entity, returning it if present
    pub fn remove_entity_threshold(
        &self,
        entity_id: &str,
    ) -> Result<Option<EntityThreshold>, ApiError> {
        let mut removed = None;
        self.edit_thresholds(|config| {
            removed = config.remove(entity_id);
            Ok(())
        })?;
        Ok(removed)
    }

    /// Edit a copy, validate, persist, then swap it in
    fn edit_thresholds(
        &self,
        edit: impl FnOnce(&mut ThresholdConfig) -> Result<(), ApiError>,
    ) -> Result<(), ApiError> {
        {
            let mut shared = self.shared_thresholds().write();
            let mut config = (**shared).clone();
            edit(&mut config)?;
            config
                .validate()
                .map_err(|message| ApiError::InvalidInput { message })?;
            self.threshold_file().save(&config)?;
            info!("Thresholds updated ({} entities)", config.len());
            *shared = Arc::new(config);
        }
        self.emit(CoreEvent::ThresholdsUpdated);
        Ok(())
    }

    // =========================================================
    // One-off operations
    // =========================================================

    /// Send a test alert for `entity_id` through one channel, ignoring
    /// opt-in and re-notify suppression
    pub async fn send_test_alert(
        &self,
        entity_id: &str,
        channel: ChannelKind,
    ) -> Result<(), ApiError> {
        validate_entity_id(entity_id).map_err(|message| ApiError::InvalidInput { message })?;
        let dispatcher = self.runner().dispatcher().clone();
        let entity_id = entity_id.to_string();
        tokio::task::spawn_blocking(move || dispatcher.send_test_alert(&entity_id, channel))
            .await
            .map_err(|e| ApiError::Internal {
                message: e.to_string(),
            })??;
        Ok(())
    }

    /// Run one cycle now, outside the schedule.
    ///
    /// Takes the poller lock for the duration of the cycle, so it fails with
    /// [`ApiError::Lock`] while any scheduler (this process included) polls.
    pub async fn run_cycle_once(&self) -> Result<CycleReport, ApiError> {
        let runner = self.runner().clone();
        let thresholds = self.shared_thresholds().read().clone();
        let lock_path = self.lock_path().to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<CycleReport, ApiError> {
            let lock = SingletonLock::try_acquire(&lock_path)?;
            let result = runner.run(&thresholds);
            lock.release();
            Ok(result?)
        })
        .await
        .map_err(|e| ApiError::Internal {
            message: e.to_string(),
        })?
    }
}
