//! Mail and syslog relays.

use std::net::UdpSocket;
use std::time::Duration;

use chrono::Utc;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{SmtpTransport, Transport};
use tracing::debug;

use super::{ChannelKind, DispatchError, Message};
use crate::alerts::Severity;

/// A delivery channel. Calls block and must be bounded by a timeout.
pub trait NotificationChannel: Send + Sync {
    /// Which channel this is
    fn kind(&self) -> ChannelKind;

    /// Deliver one message
    fn send(&self, message: &Message) -> Result<(), DispatchError>;
}

/// SMTP relay settings
#[derive(Debug, Clone)]
pub struct MailRelayConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    pub timeout: Duration,
}

/// SMTP delivery; port 465 uses implicit TLS, every other port STARTTLS
pub struct MailRelay {
    transport: SmtpTransport,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl MailRelay {
    /// Validate addresses and build the transport (no connection is made)
    pub fn new(config: &MailRelayConfig) -> Result<Self, DispatchError> {
        let from = parse_mailbox(&config.from)?;
        let to = config
            .to
            .iter()
            .map(|addr| parse_mailbox(addr))
            .collect::<Result<Vec<_>, _>>()?;
        if to.is_empty() {
            return Err(config_error("no recipients configured"));
        }

        let builder = if config.port == 465 {
            SmtpTransport::relay(&config.host)
        } else {
            SmtpTransport::starttls_relay(&config.host)
        }
        .map_err(|e| config_error(e.to_string()))?;

        let mut builder = builder.port(config.port).timeout(Some(config.timeout));
        if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
            builder = builder.credentials(SmtpCredentials::new(
                username.to_string(),
                config.password.clone().unwrap_or_default(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }
}

impl NotificationChannel for MailRelay {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn send(&self, message: &Message) -> Result<(), DispatchError> {
        let mut builder = lettre::Message::builder()
            .from(self.from.clone())
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        let email = builder
            .body(message.body.clone())
            .map_err(|e| config_error(e.to_string()))?;

        self.transport
            .send(&email)
            .map_err(|e| DispatchError::Delivery {
                channel: ChannelKind::Email,
                message: e.to_string(),
            })?;
        debug!("Mail sent to {} recipient(s): {}", self.to.len(), message.subject);
        Ok(())
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox, DispatchError> {
    addr.parse::<Mailbox>()
        .map_err(|e| config_error(format!("invalid address '{}': {}", addr, e)))
}

fn config_error(message: impl Into<String>) -> DispatchError {
    DispatchError::Config {
        channel: ChannelKind::Email,
        message: message.into(),
    }
}

/// Syslog facility local0
const FACILITY_LOCAL0: u8 = 16;

/// UDP syslog delivery with an RFC 3164 style header
pub struct SyslogRelay {
    host: String,
    port: u16,
    timeout: Duration,
    hostname: String,
}

impl SyslogRelay {
    /// Create a relay; the socket is opened per message
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        let hostname = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            host: host.into(),
            port,
            timeout,
            hostname,
        }
    }

    fn format(&self, message: &Message) -> String {
        format!(
            "<{}>{} {} licmon: {}",
            priority(message.severity),
            Utc::now().format("%b %e %H:%M:%S"),
            self.hostname,
            message.single_line()
        )
    }

    fn delivery_error(&self, err: std::io::Error) -> DispatchError {
        DispatchError::Delivery {
            channel: ChannelKind::Syslog,
            message: format!("{}:{}: {}", self.host, self.port, err),
        }
    }
}

impl NotificationChannel for SyslogRelay {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Syslog
    }

    fn send(&self, message: &Message) -> Result<(), DispatchError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(|e| self.delivery_error(e))?;
        socket
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| self.delivery_error(e))?;
        let line = self.format(message);
        socket
            .send_to(line.as_bytes(), (self.host.as_str(), self.port))
            .map_err(|e| self.delivery_error(e))?;
        debug!("Syslog datagram sent to {}:{}", self.host, self.port);
        Ok(())
    }
}

/// `<PRI>` value: facility * 8 + severity
fn priority(severity: Option<Severity>) -> u8 {
    let level = match severity {
        Some(Severity::Critical) => 2,
        Some(Severity::Warning) => 4,
        None => 6,
    };
    FACILITY_LOCAL0 * 8 + level
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::{LicenseCount, LicenseSnapshot};
    use std::collections::BTreeMap;

    fn message(severity: Option<Severity>) -> Message {
        Message {
            subject: "subject".to_string(),
            body: "first line\nsecond line\n".to_string(),
            severity,
        }
    }

    #[test]
    fn test_priority_values() {
        assert_eq!(priority(Some(Severity::Warning)), 132);
        assert_eq!(priority(Some(Severity::Critical)), 130);
        assert_eq!(priority(None), 134);
    }

    #[test]
    fn test_syslog_datagram() {
        let receiver = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let relay = SyslogRelay::new("127.0.0.1", port, Duration::from_secs(2));
        relay.send(&message(Some(Severity::Critical))).unwrap();

        let mut buf = [0u8; 1024];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        let line = String::from_utf8_lossy(&buf[..n]);
        assert!(line.starts_with("<130>"));
        assert!(line.ends_with("licmon: first line; second line"));
    }

    #[test]
    fn test_syslog_usage_report_carries_counts() {
        let receiver = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut licenses = BTreeMap::new();
        licenses.insert("AP".to_string(), LicenseCount::new(100, 73));
        let snapshot = LicenseSnapshot::new(Utc::now(), licenses, BTreeMap::new());

        let relay = SyslogRelay::new("127.0.0.1", port, Duration::from_secs(2));
        relay.send(&Message::usage_report(&snapshot)).unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        let line = String::from_utf8_lossy(&buf[..n]);
        assert!(line.starts_with("<134>"));
        assert!(line.contains("AP 73 100 27 73.00%"));
    }

    fn mail_config() -> MailRelayConfig {
        MailRelayConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: Some("alerts".to_string()),
            password: Some("pw".to_string()),
            from: "licmon@example.com".to_string(),
            to: vec!["noc@example.com".to_string()],
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_mail_relay_builds_without_connecting() {
        assert!(MailRelay::new(&mail_config()).is_ok());

        let implicit_tls = MailRelayConfig {
            port: 465,
            ..mail_config()
        };
        let relay = MailRelay::new(&implicit_tls).unwrap();
        assert_eq!(relay.kind(), ChannelKind::Email);
    }

    #[test]
    fn test_mail_relay_rejects_bad_addresses() {
        let bad_from = MailRelayConfig {
            from: "not an address".to_string(),
            ..mail_config()
        };
        assert!(matches!(
            MailRelay::new(&bad_from),
            Err(DispatchError::Config { .. })
        ));

        let no_recipients = MailRelayConfig {
            to: Vec::new(),
            ..mail_config()
        };
        assert!(MailRelay::new(&no_recipients).is_err());
    }
}
