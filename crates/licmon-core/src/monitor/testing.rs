//! Test doubles for driving whole cycles without an appliance or relays.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::cycle::{ApplianceTarget, CycleRunner};
use super::poller::SharedThresholds;
use crate::alerts::ThresholdConfig;
use crate::notify::{ChannelKind, DispatchError, DispatchLog, Dispatcher, Message, NotificationChannel};
use crate::session::{Credentials, SessionClient, SessionError, SessionToken, SessionTransport};
use crate::store::SnapshotStore;

/// Appliance reporting `ap_used` AP licenses for site-A out of 100
pub(crate) struct FakeAppliance {
    ap_used: AtomicU64,
    auth_failure: AtomicBool,
    delay: Duration,
    logins: AtomicUsize,
    fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeAppliance {
    pub(crate) fn new(ap_used: u64) -> Self {
        Self {
            ap_used: AtomicU64::new(ap_used),
            auth_failure: AtomicBool::new(false),
            delay: Duration::ZERO,
            logins: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Hold each session open this long
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reject every login
    pub(crate) fn with_auth_failure(self) -> Self {
        self.auth_failure.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn set_ap_used(&self, used: u64) {
        self.ap_used.store(used, Ordering::SeqCst);
    }

    /// Login attempts, successful or not
    pub(crate) fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    /// Sessions that got past login
    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Most sessions ever open at once
    pub(crate) fn max_concurrent_fetches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn payload(&self) -> String {
        let used = self.ap_used.load(Ordering::SeqCst);
        serde_json::json!({
            "License Summary": [
                {"License Type": "AP", "Installed": 100, "Used": used}
            ],
            "License Clients License Usage for pool /md": [
                {"Hostname": "site-A", "AP": used},
                {"Hostname": "TOTAL", "AP": used}
            ]
        })
        .to_string()
    }
}

impl SessionTransport for FakeAppliance {
    fn login(&self, host: &str, _credentials: &Credentials) -> Result<SessionToken, SessionError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.auth_failure.load(Ordering::SeqCst) {
            return Err(SessionError::Auth {
                host: host.to_string(),
                message: "Unable to authenticate (status 1)".to_string(),
            });
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let open = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(open, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(SessionToken::new("fake-token"))
    }

    fn show(&self, _host: &str, _token: &SessionToken, _command: &str) -> Result<String, SessionError> {
        Ok(self.payload())
    }

    fn logout(&self, _host: &str, _token: &SessionToken) -> Result<(), SessionError> {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Syslog-kind channel that only counts messages
#[derive(Default)]
pub(crate) struct RecordingChannel {
    sends: AtomicUsize,
}

impl RecordingChannel {
    pub(crate) fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

impl NotificationChannel for RecordingChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Syslog
    }

    fn send(&self, _message: &Message) -> Result<(), DispatchError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A cycle runner wired to fakes inside a temp directory
pub(crate) struct TestRig {
    pub(crate) dir: tempfile::TempDir,
    pub(crate) runner: Arc<CycleRunner>,
    pub(crate) thresholds: SharedThresholds,
    pub(crate) lock_path: PathBuf,
    pub(crate) appliance: Arc<FakeAppliance>,
    pub(crate) channel: Arc<RecordingChannel>,
}

impl TestRig {
    pub(crate) fn new(appliance: FakeAppliance) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let appliance = Arc::new(appliance);
        let channel = Arc::new(RecordingChannel::default());

        let dispatcher = Dispatcher::new(
            DispatchLog::new(dir.path().join("dispatch.ndjson"), 1 << 20),
            Duration::from_secs(3600),
        )
        .with_channel(channel.clone());
        let target = ApplianceTarget {
            host: "mc.test".to_string(),
            credentials: Credentials::new("admin", "pw"),
            commands: vec!["show license-usage".to_string()],
        };
        let runner = CycleRunner::new(
            SessionClient::new(appliance.clone()),
            target,
            SnapshotStore::open(dir.path().join("snapshots")).unwrap(),
            Arc::new(dispatcher),
        );

        Self {
            lock_path: dir.path().join("run").join("poller.lock"),
            dir,
            runner: Arc::new(runner),
            thresholds: Arc::new(RwLock::new(Arc::new(ThresholdConfig::default()))),
            appliance,
            channel,
        }
    }

    pub(crate) fn store(&self) -> &SnapshotStore {
        self.runner.store()
    }

    /// Replace the shared thresholds with an edited copy
    pub(crate) fn set_thresholds(&self, edit: impl FnOnce(&mut ThresholdConfig)) {
        let mut config = (**self.thresholds.read()).clone();
        edit(&mut config);
        *self.thresholds.write() = Arc::new(config);
    }
}

/// Poll `cond` until it holds; panics after five seconds
pub(crate) async fn wait_for(cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within 5s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
