//! Core event system for push-based change notification.
//!
//! The scheduler emits cycle and phase events; the facade itself emits
//! [`CoreEvent::ThresholdsUpdated`]. Consumers call
//! [`LicenseMonitor::subscribe()`] to receive them.

use tokio::sync::broadcast;

use super::core::LicenseMonitor;
use crate::state::{LastError, PollerPhase};

/// Events emitted by the core when state changes occur.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A cycle stored a snapshot and dispatched its alerts
    CycleCompleted {
        /// Id of the stored snapshot
        snapshot_id: String,
        /// Alert events raised by the evaluator
        alerts: usize,
        /// Deliveries that actually went out
        alerts_sent: usize,
    },

    /// A cycle ended with an error; the scheduler keeps running
    CycleFailed { error: LastError },

    /// The scheduler moved to a new phase
    PhaseChanged { phase: PollerPhase },

    /// The threshold configuration was replaced
    ThresholdsUpdated,
}

impl LicenseMonitor {
    /// Subscribe to core events.
    ///
    /// If the receiver falls behind, older events are dropped (lagged).
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_sender().subscribe()
    }

    /// Emit an event; ignored if nobody is listening
    pub(crate) fn emit(&self, event: CoreEvent) {
        let _ = self.event_sender().send(event);
    }
}
