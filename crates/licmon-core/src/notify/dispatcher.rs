//! Alert fan-out with re-notify suppression.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::log::{DispatchLog, DispatchRecord};
use super::{
    ChannelDelivery, ChannelKind, DeliveryResult, DispatchError, DispatchOutcome, Message,
    NotificationChannel, SkipReason,
};
use crate::alerts::{AlertEvent, ThresholdConfig};
use crate::usage::LicenseSnapshot;

/// (entity, metric, channel)
type DedupKey = (String, String, ChannelKind);

/// Last successful send of one condition
#[derive(Debug, Clone, Copy)]
struct SentRecord {
    observed: i64,
    threshold: i64,
    at: Instant,
}

/// Sends alert events through the enabled channels.
///
/// A channel present here is globally enabled. Events are delivered on a
/// channel only when the entity also opts in.
pub struct Dispatcher {
    channels: BTreeMap<ChannelKind, Arc<dyn NotificationChannel>>,
    renotify: Duration,
    usage_report: bool,
    sent: Mutex<HashMap<DedupKey, SentRecord>>,
    log: Mutex<DispatchLog>,
}

impl Dispatcher {
    /// Dispatcher with no channels
    pub fn new(log: DispatchLog, renotify: Duration) -> Self {
        Self {
            channels: BTreeMap::new(),
            renotify,
            usage_report: false,
            sent: Mutex::new(HashMap::new()),
            log: Mutex::new(log),
        }
    }

    /// Enable a channel (replacing any channel of the same kind)
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    /// Send a usage report after each successful cycle
    pub fn with_usage_report(mut self, enabled: bool) -> Self {
        self.usage_report = enabled;
        self
    }

    /// Whether a channel is globally enabled
    pub fn is_enabled(&self, kind: ChannelKind) -> bool {
        self.channels.contains_key(&kind)
    }

    /// Enabled channels, in dispatch order
    pub fn enabled_channels(&self) -> Vec<ChannelKind> {
        self.channels.keys().copied().collect()
    }

    /// Deliver this cycle's events. Returns one outcome per event.
    ///
    /// Conditions missing from `events` are forgotten, so they alert again
    /// when they come back.
    pub fn dispatch(
        &self,
        events: &[AlertEvent],
        thresholds: &ThresholdConfig,
    ) -> Vec<DispatchOutcome> {
        self.dispatch_at(events, thresholds, Instant::now())
    }

    fn dispatch_at(
        &self,
        events: &[AlertEvent],
        thresholds: &ThresholdConfig,
        now: Instant,
    ) -> Vec<DispatchOutcome> {
        let active: HashSet<(String, String)> = events.iter().map(AlertEvent::key).collect();
        self.sent
            .lock()
            .retain(|(entity, metric, _), _| active.contains(&(entity.clone(), metric.clone())));

        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            let threshold = thresholds.get(&event.entity_id);
            let mut deliveries = Vec::with_capacity(ChannelKind::ALL.len());

            for kind in ChannelKind::ALL {
                let opted_in = threshold
                    .map(|t| match kind {
                        ChannelKind::Email => t.notify_email,
                        ChannelKind::Syslog => t.notify_syslog,
                    })
                    .unwrap_or(false);

                let result = match self.channels.get(&kind) {
                    None => DeliveryResult::Skipped(SkipReason::ChannelDisabled),
                    Some(_) if !opted_in => DeliveryResult::Skipped(SkipReason::NotOptedIn),
                    Some(channel) => self.deliver(channel.as_ref(), event, now),
                };

                self.log
                    .lock()
                    .append(&DispatchRecord::alert(event, kind, result.clone()));
                deliveries.push(ChannelDelivery {
                    channel: kind,
                    result,
                });
            }

            outcomes.push(DispatchOutcome {
                event: event.clone(),
                deliveries,
            });
        }
        outcomes
    }

    fn deliver(
        &self,
        channel: &dyn NotificationChannel,
        event: &AlertEvent,
        now: Instant,
    ) -> DeliveryResult {
        let kind = channel.kind();
        let key: DedupKey = (event.entity_id.clone(), event.metric.clone(), kind);

        if let Some(prev) = self.sent.lock().get(&key) {
            let unchanged =
                prev.observed == event.observed_value && prev.threshold == event.threshold_value;
            if unchanged && now.saturating_duration_since(prev.at) < self.renotify {
                debug!(
                    "Suppressing {} {} on {}: already sent",
                    event.entity_id, event.metric, kind
                );
                return DeliveryResult::Skipped(SkipReason::Duplicate);
            }
        }

        match channel.send(&Message::alert(event)) {
            Ok(()) => {
                info!(
                    "Alert sent via {}: {} {}={} (threshold {})",
                    kind, event.entity_id, event.metric, event.observed_value, event.threshold_value
                );
                self.sent.lock().insert(
                    key,
                    SentRecord {
                        observed: event.observed_value,
                        threshold: event.threshold_value,
                        at: now,
                    },
                );
                DeliveryResult::Sent
            }
            Err(e) => {
                warn!("Alert delivery failed: {}", e);
                DeliveryResult::Failed(e.to_string())
            }
        }
    }

    /// Send the usage report to every enabled channel, if reports are on
    pub fn send_usage_report(&self, snapshot: &LicenseSnapshot) -> Vec<ChannelDelivery> {
        if !self.usage_report {
            return Vec::new();
        }
        let message = Message::usage_report(snapshot);
        let mut deliveries = Vec::new();
        for (kind, channel) in &self.channels {
            let result = match channel.send(&message) {
                Ok(()) => DeliveryResult::Sent,
                Err(e) => {
                    warn!("Usage report delivery failed: {}", e);
                    DeliveryResult::Failed(e.to_string())
                }
            };
            self.log
                .lock()
                .append(&DispatchRecord::report(*kind, result.clone()));
            deliveries.push(ChannelDelivery {
                channel: *kind,
                result,
            });
        }
        deliveries
    }

    /// Send a one-off test alert, ignoring opt-in and suppression
    pub fn send_test_alert(&self, entity_id: &str, kind: ChannelKind) -> Result<(), DispatchError> {
        let channel = self
            .channels
            .get(&kind)
            .ok_or(DispatchError::ChannelDisabled(kind))?;

        let sent = channel.send(&Message::test_alert(entity_id));
        let result = match &sent {
            Ok(()) => DeliveryResult::Sent,
            Err(e) => DeliveryResult::Failed(e.to_string()),
        };
        self.log
            .lock()
            .append(&DispatchRecord::test(entity_id, kind, result));
        sent
    }
}
