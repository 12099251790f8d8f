//! Alert delivery through the mail and syslog relays.
//!
//! [`Dispatcher`] owns the configured channels, the re-notify memory and the
//! NDJSON dispatch log. Channel failures are reported per delivery and never
//! abort the rest of a dispatch.

mod channels;
mod dispatcher;
mod log;
mod message;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alerts::AlertEvent;

pub use channels::{MailRelay, MailRelayConfig, NotificationChannel, SyslogRelay};
pub use dispatcher::Dispatcher;
pub use log::{DispatchLog, DispatchRecord, RecordKind, DISPATCH_LOG_FILE};
pub use message::Message;

/// Delivery channel
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// SMTP mail relay
    Email,
    /// UDP syslog relay
    Syslog,
}

impl ChannelKind {
    /// Every channel, in dispatch order
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Email, ChannelKind::Syslog];

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Syslog => "syslog",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by a single channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Channel settings are unusable (bad address, unknown relay host)
    #[error("{channel} channel misconfigured: {message}")]
    Config { channel: ChannelKind, message: String },

    /// The relay refused or could not be reached
    #[error("{channel} delivery failed: {message}")]
    Delivery { channel: ChannelKind, message: String },

    /// The channel is not enabled in the settings
    #[error("{0} channel is not enabled")]
    ChannelDisabled(ChannelKind),
}

/// Why a delivery was not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Channel not enabled globally
    ChannelDisabled,
    /// Entity has not opted in to this channel
    NotOptedIn,
    /// Same condition already sent inside the re-notify window
    Duplicate,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::ChannelDisabled => "channel disabled",
            SkipReason::NotOptedIn => "entity not opted in",
            SkipReason::Duplicate => "duplicate within re-notify window",
        };
        f.write_str(s)
    }
}

/// Result of one delivery attempt on one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "lowercase")]
pub enum DeliveryResult {
    Sent,
    Skipped(SkipReason),
    Failed(String),
}

impl DeliveryResult {
    /// True for `Sent`
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryResult::Sent)
    }
}

/// Per-channel delivery result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub channel: ChannelKind,
    #[serde(flatten)]
    pub result: DeliveryResult,
}

/// Everything that happened to one alert event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub event: AlertEvent,
    pub deliveries: Vec<ChannelDelivery>,
}

impl DispatchOutcome {
    /// Result for one channel
    pub fn result_for(&self, channel: ChannelKind) -> Option<&DeliveryResult> {
        self.deliveries
            .iter()
            .find(|d| d.channel == channel)
            .map(|d| &d.result)
    }

    /// Number of channels that delivered
    pub fn sent_count(&self) -> usize {
        self.deliveries.iter().filter(|d| d.result.is_sent()).count()
    }
}
