//! Builder for constructing a [`LicenseMonitor`] instance.
//!
//! ```ignore
//! let monitor = LicenseMonitorBuilder::new(settings)
//!     .with_run_on_start(false)
//!     .build()?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use tracing::debug;

use crate::config::{Settings, MIN_INTERVAL_SECS};
use crate::monitor::{ApplianceTarget, CycleRunner};
use crate::notify::{
    DispatchLog, Dispatcher, MailRelay, MailRelayConfig, NotificationChannel, SyslogRelay,
};
use crate::session::{Credentials, HttpTransport, SessionClient, SessionTransport};
use crate::state::{PollerState, SharedPollerState};
use crate::store::{IntervalFile, SnapshotStore, ThresholdFile};

use super::core::LicenseMonitor;

/// Builder for constructing a [`LicenseMonitor`] facade instance
pub struct LicenseMonitorBuilder {
    settings: Arc<Settings>,
    transport: Option<Arc<dyn SessionTransport>>,
    channels: Option<Vec<Arc<dyn NotificationChannel>>>,
    state: Option<SharedPollerState>,
    run_on_start: Option<bool>,
    interval_secs: Option<u64>,
}

impl LicenseMonitorBuilder {
    /// Create a new builder with the given settings
    pub fn new(settings: Settings) -> Self {
        Self::from_shared_settings(Arc::new(settings))
    }

    /// Create a new builder from already-shared settings
    pub fn from_shared_settings(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            transport: None,
            channels: None,
            state: None,
            run_on_start: None,
            interval_secs: None,
        }
    }

    /// Talk to the appliance through this transport instead of HTTPS
    pub fn with_transport(mut self, transport: Arc<dyn SessionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use this channel instead of the ones configured in settings.
    ///
    /// Once any channel is given, `[smtp]` and `[syslog]` are ignored.
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.get_or_insert_with(Vec::new).push(channel);
        self
    }

    /// Use an existing shared poller state instead of creating a new one
    pub fn with_state(mut self, state: SharedPollerState) -> Self {
        self.state = Some(state);
        self
    }

    /// Override `poller.run_on_start`
    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = Some(run_on_start);
        self
    }

    /// Start with this interval, ignoring the one saved by `update_interval`
    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = Some(secs);
        self
    }

    /// Build the `LicenseMonitor` instance.
    ///
    /// Opens the data directory and loads the threshold file; fails if either
    /// is unusable or a configured relay is invalid. No network connection is
    /// made.
    pub fn build(self) -> Result<LicenseMonitor> {
        let settings = self.settings;

        let store = SnapshotStore::open(settings.snapshot_dir())?;
        let threshold_file = ThresholdFile::new(settings.thresholds_path());
        let thresholds = threshold_file.load()?;
        debug!(
            "Loaded {} threshold(s) from {:?}",
            thresholds.len(),
            threshold_file.path()
        );

        let channels = match self.channels {
            Some(channels) => channels,
            None => configured_channels(&settings)?,
        };
        let mut dispatcher = Dispatcher::new(
            DispatchLog::new(
                settings.dispatch_log_path(),
                settings.storage.dispatch_log_max_bytes,
            ),
            Duration::from_secs(settings.notifications.renotify_secs),
        )
        .with_usage_report(settings.notifications.usage_report);
        for channel in channels {
            dispatcher = dispatcher.with_channel(channel);
        }

        let appliance = &settings.appliance;
        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(HttpTransport::new(
                appliance.port,
                appliance.verify_tls,
                appliance.timeout(),
            ))
        });
        let target = ApplianceTarget {
            host: appliance.host.clone(),
            credentials: Credentials::new(appliance.username.clone(), appliance.password.clone()),
            commands: appliance.commands.clone(),
        };
        let runner = CycleRunner::new(
            SessionClient::new(transport),
            target,
            store,
            Arc::new(dispatcher),
        );

        let interval_file = IntervalFile::new(settings.interval_path());
        let state = match self.state {
            Some(state) => state,
            None => {
                let saved = match self.interval_secs {
                    Some(_) => None,
                    None => interval_file.load()?,
                };
                let interval = self
                    .interval_secs
                    .or(saved)
                    .unwrap_or(settings.poller.interval_secs)
                    .max(MIN_INTERVAL_SECS);
                if saved.is_some() {
                    debug!("Using saved poll interval {}s", interval);
                }
                PollerState::shared(interval)
            }
        };
        let run_on_start = self.run_on_start.unwrap_or(settings.poller.run_on_start);
        let lock_path = settings.lock_path();

        Ok(LicenseMonitor::new(
            settings,
            Arc::new(runner),
            Arc::new(RwLock::new(Arc::new(thresholds))),
            threshold_file,
            interval_file,
            state,
            lock_path,
            run_on_start,
        ))
    }
}

/// Relays enabled in `[smtp]` and `[syslog]`
fn configured_channels(settings: &Settings) -> Result<Vec<Arc<dyn NotificationChannel>>> {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();

    let smtp = &settings.smtp;
    if smtp.enabled {
        if smtp.host.trim().is_empty() {
            bail!("smtp.host is not set");
        }
        let relay = MailRelay::new(&MailRelayConfig {
            host: smtp.host.clone(),
            port: smtp.port,
            username: smtp.username.clone(),
            password: smtp.password.clone(),
            from: smtp.from.clone(),
            to: smtp.to.clone(),
            timeout: Duration::from_secs(smtp.timeout_secs.max(1)),
        })
        .context("Invalid [smtp] settings")?;
        channels.push(Arc::new(relay));
    }

    let syslog = &settings.syslog;
    if syslog.enabled {
        if syslog.host.trim().is_empty() {
            bail!("syslog.host is not set");
        }
        channels.push(Arc::new(SyslogRelay::new(
            syslog.host.clone(),
            syslog.port,
            syslog.timeout(),
        )));
    }

    Ok(channels)
}
