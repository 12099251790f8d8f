use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::cycle::CycleRunner;
use super::lock::{LockError, SingletonLock};
use crate::alerts::ThresholdConfig;
use crate::api::{CoreEvent, ManualCycle, RejectReason};
use crate::state::{ErrorKind, LastError, PollerPhase, SharedPollerState};

/// Threshold configuration shared with the facade; the inner `Arc` is swapped whole
pub type SharedThresholds = Arc<RwLock<Arc<ThresholdConfig>>>;

/// Commands accepted by a running scheduler
#[derive(Debug)]
pub enum Command {
    /// Run one cycle now
    Refresh,
    /// Restart with a new interval; replies with the phase after the handoff
    UpdateInterval {
        secs: u64,
        done: oneshot::Sender<PollerPhase>,
    },
    /// Stop and release the lock
    Shutdown,
}

/// Periodic poll loop guarded by the host-wide lock
pub struct Scheduler {
    runner: Arc<CycleRunner>,
    thresholds: SharedThresholds,
    state: SharedPollerState,
    lock_path: PathBuf,
    run_on_start: bool,
    refresh_pending: Arc<AtomicBool>,
    event_tx: Option<broadcast::Sender<CoreEvent>>,
}

impl Scheduler {
    /// Create a scheduler. The interval is read from `state`.
    pub fn new(
        runner: Arc<CycleRunner>,
        thresholds: SharedThresholds,
        state: SharedPollerState,
        lock_path: PathBuf,
    ) -> Self {
        Self {
            runner,
            thresholds,
            state,
            lock_path,
            run_on_start: true,
            refresh_pending: Arc::new(AtomicBool::new(false)),
            event_tx: None,
        }
    }

    /// Whether the first cycle runs immediately after the lock is taken
    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Set the core event sender for cycle and phase notifications
    pub fn with_event_tx(mut self, tx: broadcast::Sender<CoreEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Take the lock and start polling in a background task.
    ///
    /// The lock attempt happens before returning, so the caller learns at
    /// once whether this process became the poller. Must be called inside a
    /// tokio runtime.
    pub fn start(self) -> Result<SchedulerHandle, LockError> {
        self.set_phase(PollerPhase::AcquiringLock);
        let lock = match SingletonLock::try_acquire(&self.lock_path) {
            Ok(lock) => lock,
            Err(e) => {
                self.record_lock_failure(&e);
                return Err(e);
            }
        };
        self.mark_running();

        let (tx, rx) = mpsc::channel(8);
        let refresh_pending = self.refresh_pending.clone();
        let task = tokio::spawn(async move {
            self.run(lock, rx).await;
        });

        Ok(SchedulerHandle {
            control: SchedulerControl {
                commands: tx,
                refresh_pending,
            },
            task,
        })
    }

    /// Run the polling loop
    async fn run(mut self, lock: SingletonLock, mut rx: mpsc::Receiver<Command>) {
        let mut lock = Some(lock);
        let mut next_tick = if self.run_on_start {
            Instant::now()
        } else {
            Instant::now() + self.interval()
        };

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_tick) => {
                    self.run_cycle().await;
                    next_tick = Instant::now() + self.interval();
                }
                cmd = rx.recv() => match cmd {
                    Some(Command::Refresh) => {
                        // Cleared when a tick cycle ran after the request was queued
                        if self.refresh_pending.load(Ordering::SeqCst) {
                            self.run_cycle().await;
                            next_tick = Instant::now() + self.interval();
                        } else {
                            debug!("Manual refresh already covered by a scheduled cycle");
                        }
                    }
                    Some(Command::UpdateInterval { secs, done }) => {
                        lock = self.handoff(lock.take(), secs).await;
                        let _ = done.send(self.state.read().phase);
                        if lock.is_none() {
                            // Someone else took over during the handoff
                            return;
                        }
                        next_tick = Instant::now() + self.interval();
                    }
                    Some(Command::Shutdown) | None => break,
                }
            }
        }

        if let Some(lock) = lock {
            self.stop(lock);
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.state.read().interval_secs.max(1))
    }

    /// Run one cycle on a blocking thread and record the result
    async fn run_cycle(&mut self) {
        self.state.write().cycle_in_flight = true;
        self.refresh_pending.store(false, Ordering::SeqCst);

        let thresholds = self.thresholds.read().clone();
        let runner = self.runner.clone();
        let result = tokio::task::spawn_blocking(move || runner.run(&thresholds)).await;

        let event = {
            let mut state = self.state.write();
            state.cycle_in_flight = false;
            state.last_cycle_at = Some(Utc::now());
            state.cycles_completed += 1;

            match result {
                Ok(Ok(report)) => {
                    state.last_error = None;
                    CoreEvent::CycleCompleted {
                        snapshot_id: report.snapshot.id(),
                        alerts: report.alerts.len(),
                        alerts_sent: report.alerts_sent(),
                    }
                }
                Ok(Err(e)) => {
                    if e.is_elevated() {
                        error!("Poll cycle failed: {}", e);
                    } else {
                        warn!("Poll cycle failed: {}", e);
                    }
                    let last = e.to_last_error();
                    state.last_error = Some(last.clone());
                    CoreEvent::CycleFailed { error: last }
                }
                Err(e) => {
                    error!("Poll cycle task aborted: {}", e);
                    let last = LastError {
                        kind: ErrorKind::Internal,
                        message: e.to_string(),
                        at: Utc::now(),
                        elevated: true,
                    };
                    state.last_error = Some(last.clone());
                    CoreEvent::CycleFailed { error: last }
                }
            }
        };
        self.emit(event);
    }

    /// Stop, release, then take the lock again with the new interval
    async fn handoff(&self, lock: Option<SingletonLock>, secs: u64) -> Option<SingletonLock> {
        info!("Poll interval changing to {}s, restarting poller", secs);
        if let Some(lock) = lock {
            self.stop(lock);
        }
        self.state.write().interval_secs = secs;

        self.set_phase(PollerPhase::AcquiringLock);
        let path = self.lock_path.clone();
        match tokio::task::spawn_blocking(move || SingletonLock::try_acquire(&path)).await {
            Ok(Ok(lock)) => {
                self.mark_running();
                Some(lock)
            }
            Ok(Err(e)) => {
                self.record_lock_failure(&e);
                None
            }
            Err(e) => {
                error!("Lock task aborted: {}", e);
                self.set_phase(PollerPhase::Failed);
                None
            }
        }
    }

    /// Running → Stopping → (release) → Idle
    fn stop(&self, lock: SingletonLock) {
        self.set_phase(PollerPhase::Stopping);
        lock.release();
        self.state.write().lock_held = false;
        self.set_phase(PollerPhase::Idle);
        debug!("Poller stopped");
    }

    fn mark_running(&self) {
        {
            let mut state = self.state.write();
            state.lock_held = true;
            state.lock_path = Some(self.lock_path.clone());
        }
        self.set_phase(PollerPhase::Running);
        info!(
            "Poller running every {}s (lock {:?})",
            self.state.read().interval_secs,
            self.lock_path
        );
    }

    fn record_lock_failure(&self, err: &LockError) {
        if err.is_contention() {
            info!("Not polling: {}", err);
        } else {
            warn!("Not polling: {}", err);
            self.state.write().last_error = Some(LastError {
                kind: ErrorKind::Lock,
                message: err.to_string(),
                at: Utc::now(),
                elevated: true,
            });
        }
        self.state.write().lock_held = false;
        self.set_phase(PollerPhase::Failed);
    }

    fn set_phase(&self, phase: PollerPhase) {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut state.phase, phase)
        };
        if previous == phase {
            return;
        }
        #[cfg(test)]
        running_tracker::transition(&self.lock_path, previous, phase);
        debug!("Poller phase {} -> {}", previous, phase);
        self.emit(CoreEvent::PhaseChanged { phase });
    }

    fn emit(&self, event: CoreEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// Cloneable sender side of a running scheduler
#[derive(Clone)]
pub struct SchedulerControl {
    commands: mpsc::Sender<Command>,
    refresh_pending: Arc<AtomicBool>,
}

impl SchedulerControl {
    /// Queue a manual cycle unless one is in flight or already queued
    pub fn request_refresh(&self, state: &SharedPollerState) -> ManualCycle {
        {
            let state = state.read();
            if !state.is_running() || self.commands.is_closed() {
                return ManualCycle::Rejected(RejectReason::NotRunning);
            }
            if state.cycle_in_flight {
                return ManualCycle::Rejected(RejectReason::AlreadyRunning);
            }
        }
        if self.refresh_pending.swap(true, Ordering::SeqCst) {
            return ManualCycle::Rejected(RejectReason::AlreadyRunning);
        }
        match self.commands.try_send(Command::Refresh) {
            Ok(()) => ManualCycle::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.refresh_pending.store(false, Ordering::SeqCst);
                ManualCycle::Rejected(RejectReason::AlreadyRunning)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.refresh_pending.store(false, Ordering::SeqCst);
                ManualCycle::Rejected(RejectReason::NotRunning)
            }
        }
    }

    /// Restart the loop with a new interval and wait for the handoff.
    ///
    /// Returns `None` if the loop has already stopped.
    pub async fn update_interval(&self, secs: u64) -> Option<PollerPhase> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(Command::UpdateInterval { secs, done })
            .await
            .ok()?;
        rx.await.ok()
    }
}

/// Handle to a started scheduler
pub struct SchedulerHandle {
    control: SchedulerControl,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Sender side, for use without holding the handle
    pub fn control(&self) -> SchedulerControl {
        self.control.clone()
    }

    /// Queue a manual cycle unless one is in flight or already queued
    pub fn request_refresh(&self, state: &SharedPollerState) -> ManualCycle {
        if self.task.is_finished() {
            return ManualCycle::Rejected(RejectReason::NotRunning);
        }
        self.control.request_refresh(state)
    }

    /// Restart the loop with a new interval and wait for the handoff
    pub async fn update_interval(&self, secs: u64) -> Option<PollerPhase> {
        self.control.update_interval(secs).await
    }

    /// Whether the background task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop polling and wait for the lock to be released
    pub async fn shutdown(self) {
        let _ = self.control.commands.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            error!("Poller task ended abnormally: {}", e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::EntityThreshold;
    use crate::monitor::testing::{wait_for, FakeAppliance, TestRig};
    use crate::state::PollerState;

    fn scheduler(rig: &TestRig, state: &SharedPollerState) -> Scheduler {
        Scheduler::new(
            rig.runner.clone(),
            rig.thresholds.clone(),
            state.clone(),
            rig.lock_path.clone(),
        )
        .with_run_on_start(false)
    }

    #[tokio::test]
    async fn test_second_scheduler_on_same_lock_fails() {
        let rig = TestRig::new(FakeAppliance::new(40));
        let state_a = PollerState::shared(3600);
        let state_b = PollerState::shared(3600);

        let handle_a = scheduler(&rig, &state_a).with_run_on_start(true).start().unwrap();
        let err = scheduler(&rig, &state_b).start().err().unwrap();
        assert!(err.is_contention());

        assert_eq!(state_a.read().phase, PollerPhase::Running);
        assert!(state_a.read().lock_held);
        assert_eq!(state_b.read().phase, PollerPhase::Failed);
        assert!(!state_b.read().lock_held);
        assert!(state_b.read().last_error.is_none());

        wait_for(|| state_a.read().cycles_completed >= 1).await;
        assert_eq!(state_b.read().cycles_completed, 0);
        assert_eq!(rig.appliance.fetches(), 1);

        handle_a.shutdown().await;
        assert_eq!(state_a.read().phase, PollerPhase::Idle);
        assert!(!state_a.read().lock_held);

        // Lock is free again
        let handle_b = scheduler(&rig, &state_b).start().unwrap();
        assert_eq!(state_b.read().phase, PollerPhase::Running);
        handle_b.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_refresh_runs_cycle() {
        let rig = TestRig::new(FakeAppliance::new(40));
        let state = PollerState::shared(3600);
        let handle = scheduler(&rig, &state).start().unwrap();

        assert_eq!(handle.request_refresh(&state), ManualCycle::Accepted);
        wait_for(|| state.read().cycles_completed == 1).await;

        let s = state.read().clone();
        assert!(s.last_cycle_at.is_some());
        assert!(s.last_error.is_none());
        assert!(!s.cycle_in_flight);
        assert!(rig.store().latest().unwrap().is_some());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_refresh_is_coalesced() {
        let rig = TestRig::new(FakeAppliance::new(40).with_delay(Duration::from_millis(300)));
        let state = PollerState::shared(3600);
        let handle = scheduler(&rig, &state).start().unwrap();

        assert_eq!(handle.request_refresh(&state), ManualCycle::Accepted);
        assert_eq!(
            handle.request_refresh(&state),
            ManualCycle::Rejected(RejectReason::AlreadyRunning)
        );
        wait_for(|| state.read().cycle_in_flight).await;
        assert_eq!(
            handle.request_refresh(&state),
            ManualCycle::Rejected(RejectReason::AlreadyRunning)
        );

        wait_for(|| state.read().cycles_completed == 1 && !state.read().cycle_in_flight).await;
        assert_eq!(handle.request_refresh(&state), ManualCycle::Accepted);
        wait_for(|| state.read().cycles_completed == 2).await;
        assert_eq!(rig.appliance.fetches(), 2);

        handle.shutdown().await;
        assert_eq!(
            handle_rejects_after_shutdown(&rig, &state).await,
            ManualCycle::Rejected(RejectReason::NotRunning)
        );
    }

    async fn handle_rejects_after_shutdown(rig: &TestRig, state: &SharedPollerState) -> ManualCycle {
        // A fresh handle whose loop has already stopped
        let handle = scheduler(rig, state).start().unwrap();
        handle.control.commands.send(Command::Shutdown).await.unwrap();
        wait_for(|| state.read().phase == PollerPhase::Idle).await;
        handle.request_refresh(state)
    }

    #[tokio::test]
    async fn test_refresh_covered_by_tick_is_skipped() {
        let rig = TestRig::new(FakeAppliance::new(40));
        let state = PollerState::shared(3600);
        let handle = scheduler(&rig, &state).start().unwrap();

        // A refresh whose pending flag a tick cycle has already cleared
        handle.control.commands.send(Command::Refresh).await.unwrap();
        assert_eq!(handle.request_refresh(&state), ManualCycle::Accepted);

        // Commands are handled in order, so both refreshes are done once this returns
        assert_eq!(handle.update_interval(3600).await, Some(PollerPhase::Running));
        assert_eq!(state.read().cycles_completed, 1);
        assert_eq!(rig.appliance.fetches(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_refresh_restarts_interval() {
        let rig = TestRig::new(FakeAppliance::new(40));
        let state = PollerState::shared(3);
        let handle = scheduler(&rig, &state).start().unwrap();

        // First tick is due at 3s; refresh at 2s pushes it to about 5s
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.request_refresh(&state), ManualCycle::Accepted);
        wait_for(|| state.read().cycles_completed == 1).await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(state.read().cycles_completed, 1);

        wait_for(|| state.read().cycles_completed == 2).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_auth_error_keeps_polling() {
        let rig = TestRig::new(FakeAppliance::new(40).with_auth_failure());
        let state = PollerState::shared(3600);
        let handle = scheduler(&rig, &state).start().unwrap();

        assert_eq!(handle.request_refresh(&state), ManualCycle::Accepted);
        wait_for(|| state.read().cycles_completed == 1).await;

        {
            let s = state.read();
            let err = s.last_error.as_ref().unwrap();
            assert_eq!(err.kind, ErrorKind::Auth);
            assert!(err.elevated);
            assert_eq!(s.phase, PollerPhase::Running);
        }
        assert!(rig.store().latest().unwrap().is_none());
        assert_eq!(rig.channel.sends(), 0);

        // Still polling
        assert_eq!(handle.request_refresh(&state), ManualCycle::Accepted);
        wait_for(|| state.read().cycles_completed == 2).await;
        assert_eq!(rig.appliance.logins(), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_unchanged_breach_is_not_resent() {
        let rig = TestRig::new(FakeAppliance::new(60));
        rig.set_thresholds(|t| t.insert("site-A", EntityThreshold::new(50).with_syslog()));
        let state = PollerState::shared(3600);
        let handle = scheduler(&rig, &state).start().unwrap();

        handle.request_refresh(&state);
        wait_for(|| state.read().cycles_completed == 1).await;
        assert_eq!(rig.channel.sends(), 1);

        handle.request_refresh(&state);
        wait_for(|| state.read().cycles_completed == 2).await;
        assert_eq!(rig.channel.sends(), 1);

        // Changed value alerts again
        rig.appliance.set_ap_used(61);
        handle.request_refresh(&state);
        wait_for(|| state.read().cycles_completed == 3).await;
        assert_eq!(rig.channel.sends(), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_threshold_swap_applies_next_cycle() {
        let rig = TestRig::new(FakeAppliance::new(60));
        let state = PollerState::shared(3600);
        let handle = scheduler(&rig, &state).start().unwrap();

        handle.request_refresh(&state);
        wait_for(|| state.read().cycles_completed == 1).await;
        assert_eq!(rig.channel.sends(), 0);

        rig.set_thresholds(|t| t.insert("site-A", EntityThreshold::new(50).with_syslog()));
        handle.request_refresh(&state);
        wait_for(|| state.read().cycles_completed == 2).await;
        assert_eq!(rig.channel.sends(), 1);
        assert_eq!(state.read().phase, PollerPhase::Running);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_interval_hands_off_lock() {
        let rig = TestRig::new(FakeAppliance::new(40));
        let state = PollerState::shared(3600);
        let handle = scheduler(&rig, &state).start().unwrap();

        assert_eq!(handle.update_interval(7200).await, Some(PollerPhase::Running));
        {
            let s = state.read();
            assert_eq!(s.interval_secs, 7200);
            assert!(s.lock_held);
        }
        assert_eq!(running_tracker::max_running(&rig.lock_path), 1);

        handle.shutdown().await;
        assert_eq!(state.read().phase, PollerPhase::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reconfiguration_never_runs_two_pollers() {
        let rig = TestRig::new(FakeAppliance::new(40).with_delay(Duration::from_millis(2)));
        let state_a = PollerState::shared(3600);
        let state_b = PollerState::shared(3600);

        let handle_a = scheduler(&rig, &state_a).start().unwrap();

        // A contender keeps trying to take the lock while A reconfigures
        let contender = {
            let (runner, thresholds) = (rig.runner.clone(), rig.thresholds.clone());
            let (lock_path, state_b) = (rig.lock_path.clone(), state_b.clone());
            tokio::spawn(async move {
                let mut handle: Option<SchedulerHandle> = None;
                for _ in 0..300 {
                    match &handle {
                        Some(h) => {
                            h.request_refresh(&state_b);
                        }
                        None => {
                            let attempt = Scheduler::new(
                                runner.clone(),
                                thresholds.clone(),
                                state_b.clone(),
                                lock_path.clone(),
                            )
                            .with_run_on_start(false)
                            .start();
                            handle = attempt.ok();
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                handle
            })
        };

        for round in 0..30u64 {
            handle_a.request_refresh(&state_a);
            if handle_a.update_interval(3600 + round).await != Some(PollerPhase::Running) {
                break;
            }
        }
        let handle_b = contender.await.unwrap();

        let running = [&state_a, &state_b]
            .iter()
            .filter(|s| s.read().phase == PollerPhase::Running)
            .count();
        assert_eq!(running, 1);
        assert_eq!(running_tracker::max_running(&rig.lock_path), 1);
        assert!(rig.appliance.max_concurrent_fetches() <= 1);

        handle_a.shutdown().await;
        if let Some(h) = handle_b {
            h.shutdown().await;
        }
        assert_eq!(running_tracker::max_running(&rig.lock_path), 1);
    }
}
