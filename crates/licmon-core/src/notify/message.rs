//! Notification text shared by every channel.

use crate::alerts::{AlertEvent, Severity};
use crate::usage::LicenseSnapshot;

/// Rendered notification
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Mail subject
    pub subject: String,
    /// Plain-text body; the syslog relay flattens it to one line
    pub body: String,
    /// `None` for informational messages
    pub severity: Option<Severity>,
}

impl Message {
    /// Message for a threshold breach
    pub fn alert(event: &AlertEvent) -> Self {
        let subject = format!(
            "[licmon] {} {} on {}",
            event.severity.as_str().to_uppercase(),
            event.metric,
            event.entity_id
        );
        let body = format!(
            "{} {} is {} (threshold {}) at {}\n",
            event.entity_id,
            event.metric,
            event.observed_value,
            event.threshold_value,
            event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        Self {
            subject,
            body,
            severity: Some(event.severity),
        }
    }

    /// Usage report for a snapshot
    pub fn usage_report(snapshot: &LicenseSnapshot) -> Self {
        let mut body = format!(
            "License usage at {} ({} connected clients)\n",
            snapshot.taken_at().format("%Y-%m-%d %H:%M:%S UTC"),
            snapshot.connected_clients()
        );
        body.push_str(&format!(
            "{:<10} {:>8} {:>8} {:>10} {:>8}\n",
            "Type", "Used", "Total", "Available", "Usage"
        ));
        for item in snapshot.summary() {
            body.push_str(&format!(
                "{:<10} {:>8} {:>8} {:>10} {:>7.2}%\n",
                item.license_type,
                item.used,
                item.total_installed,
                item.available,
                item.usage_percent
            ));
        }
        Self {
            subject: format!(
                "[licmon] License usage report {}",
                snapshot.taken_at().format("%Y-%m-%d")
            ),
            body,
            severity: None,
        }
    }

    /// One-off message used to verify a channel end to end
    pub fn test_alert(entity_id: &str) -> Self {
        Self {
            subject: format!("[licmon] Test alert for {}", entity_id),
            body: format!(
                "Test alert for {} sent at {}\n",
                entity_id,
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            ),
            severity: Some(Severity::Warning),
        }
    }

    /// Whole body on one line: runs of whitespace collapse to a single
    /// space and body lines are joined with "; ". Falls back to the subject
    /// for an empty body.
    pub fn single_line(&self) -> String {
        let line = self
            .body
            .lines()
            .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        if line.is_empty() {
            self.subject.clone()
        } else {
            line
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::LicenseCount;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    #[test]
    fn test_alert_message() {
        let event = AlertEvent {
            entity_id: "site-A".to_string(),
            metric: "AP_used".to_string(),
            observed_value: 60,
            threshold_value: 50,
            timestamp: Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap(),
            severity: Severity::Warning,
        };
        let msg = Message::alert(&event);
        assert_eq!(msg.subject, "[licmon] WARNING AP_used on site-A");
        assert_eq!(
            msg.single_line(),
            "site-A AP_used is 60 (threshold 50) at 2026-05-04 12:00:00 UTC"
        );
        assert_eq!(msg.severity, Some(Severity::Warning));
    }

    #[test]
    fn test_usage_report_lists_headline_types() {
        let mut licenses = BTreeMap::new();
        licenses.insert("AP".to_string(), LicenseCount::new(100, 104));
        let snapshot = LicenseSnapshot::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap(),
            licenses,
            BTreeMap::new(),
        );
        let msg = Message::usage_report(&snapshot);
        assert!(msg.subject.ends_with("2026-05-04"));
        assert!(msg.body.contains("-4"));
        for t in ["AP", "PEF", "RFP", "MM", "MC-VA-RW"] {
            assert!(msg.body.contains(t));
        }
        assert!(msg.severity.is_none());
    }

    #[test]
    fn test_usage_report_single_line_keeps_counts() {
        let mut licenses = BTreeMap::new();
        licenses.insert("AP".to_string(), LicenseCount::new(100, 73));
        let snapshot = LicenseSnapshot::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap(),
            licenses,
            BTreeMap::new(),
        );
        let line = Message::usage_report(&snapshot).single_line();
        assert!(!line.contains('\n'));
        assert!(line.contains("AP 73 100 27 73.00%"));
    }

    #[test]
    fn test_single_line_falls_back_to_subject() {
        let msg = Message {
            subject: "subject".to_string(),
            body: "\n  \n".to_string(),
            severity: None,
        };
        assert_eq!(msg.single_line(), "subject");
    }
}
