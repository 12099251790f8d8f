//! One poll cycle: fetch, parse, persist, evaluate, dispatch.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use crate::alerts::{self, ThresholdConfig};
use crate::notify::{ChannelDelivery, Dispatcher, DispatchOutcome};
use crate::session::{join_outputs, Credentials, SessionClient, SessionError};
use crate::state::{ErrorKind, LastError};
use crate::store::SnapshotStore;
use crate::usage::{self, LicenseSnapshot, ParseError};

/// Failure of a single cycle. Never stops the scheduler.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("failed to persist snapshot: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl CycleError {
    /// Auth and parse failures need an operator, everything else is transient
    pub fn is_elevated(&self) -> bool {
        match self {
            CycleError::Session(e) => e.is_elevated(),
            CycleError::Parse(_) => true,
            CycleError::Store(_) => false,
        }
    }

    /// Category for status reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            CycleError::Session(SessionError::Connection { .. }) => ErrorKind::Connection,
            CycleError::Session(SessionError::Auth { .. }) => ErrorKind::Auth,
            CycleError::Session(SessionError::Command { .. }) => ErrorKind::Command,
            CycleError::Parse(_) => ErrorKind::Parse,
            CycleError::Store(_) => ErrorKind::Store,
        }
    }

    /// Convert to the user-facing form kept in the poller state
    pub fn to_last_error(&self) -> LastError {
        LastError {
            kind: self.kind(),
            message: self.to_string(),
            at: Utc::now(),
            elevated: self.is_elevated(),
        }
    }
}

/// Result of a successful cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub snapshot: LicenseSnapshot,
    pub alerts: Vec<DispatchOutcome>,
    pub usage_report: Vec<ChannelDelivery>,
}

impl CycleReport {
    /// Alert deliveries that actually went out
    pub fn alerts_sent(&self) -> usize {
        self.alerts.iter().map(DispatchOutcome::sent_count).sum()
    }
}

/// Appliance endpoint and the commands to run on it
#[derive(Debug, Clone)]
pub struct ApplianceTarget {
    pub host: String,
    pub credentials: Credentials,
    pub commands: Vec<String>,
}

/// Everything one cycle needs. All calls block; run on a blocking thread.
pub struct CycleRunner {
    client: SessionClient,
    target: ApplianceTarget,
    store: SnapshotStore,
    dispatcher: Arc<Dispatcher>,
}

impl CycleRunner {
    pub fn new(
        client: SessionClient,
        target: ApplianceTarget,
        store: SnapshotStore,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            client,
            target,
            store,
            dispatcher,
        }
    }

    /// Snapshot store used by this runner
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Dispatcher used by this runner
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run the whole pipeline once, strictly in order
    pub fn run(&self, thresholds: &ThresholdConfig) -> Result<CycleReport, CycleError> {
        let outputs =
            self.client
                .fetch(&self.target.commands, &self.target.credentials, &self.target.host)?;
        let snapshot = usage::parse(&join_outputs(&outputs))?;

        let path = self.store.save(&snapshot)?;
        debug!("Snapshot {} saved to {:?}", snapshot.id(), path);

        let events = alerts::evaluate(&snapshot, thresholds);
        let alerts = self.dispatcher.dispatch(&events, thresholds);
        let usage_report = self.dispatcher.send_usage_report(&snapshot);

        info!(
            clients = snapshot.connected_clients(),
            events = events.len(),
            "Cycle complete for snapshot {}",
            snapshot.id()
        );
        Ok(CycleReport {
            snapshot,
            alerts,
            usage_report,
        })
    }
}
