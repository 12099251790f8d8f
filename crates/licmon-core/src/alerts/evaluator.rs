//! Stateless threshold evaluation over one snapshot.

use tracing::debug;

use super::types::{AlertEvent, Severity, ThresholdConfig, AP_USED_METRIC};
use crate::usage::LicenseSnapshot;

/// Compare each configured entity's AP usage against its threshold.
///
/// An event is produced only when the observed count is strictly greater
/// than the threshold. Entities with a non-positive threshold, or absent
/// from the snapshot's client rows, are ignored. Events come back sorted by
/// entity id.
pub fn evaluate(snapshot: &LicenseSnapshot, thresholds: &ThresholdConfig) -> Vec<AlertEvent> {
    let severity = match snapshot.available("AP") {
        Some(available) if available < 0 => Severity::Critical,
        _ => Severity::Warning,
    };

    let mut events = Vec::new();
    for (entity_id, threshold) in thresholds.iter() {
        if !threshold.is_enabled() {
            continue;
        }
        let Some(used) = snapshot.client_used(entity_id, "AP") else {
            debug!("No usage row for {}, not evaluated", entity_id);
            continue;
        };
        let observed = used as i64;
        if observed > threshold.ap_threshold {
            events.push(AlertEvent {
                entity_id: entity_id.clone(),
                metric: AP_USED_METRIC.to_string(),
                observed_value: observed,
                threshold_value: threshold.ap_threshold,
                timestamp: snapshot.taken_at(),
                severity,
            });
        }
    }
    // ThresholdConfig iterates in id order already
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::EntityThreshold;
    use crate::usage::LicenseCount;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn snapshot(pool: (u64, u64), clients: &[(&str, u64)]) -> LicenseSnapshot {
        let mut licenses = BTreeMap::new();
        licenses.insert("AP".to_string(), LicenseCount::new(pool.0, pool.1));
        let clients = clients
            .iter()
            .map(|(name, ap)| {
                let mut row = BTreeMap::new();
                row.insert("AP".to_string(), *ap);
                (name.to_string(), row)
            })
            .collect();
        LicenseSnapshot::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap(),
            licenses,
            clients,
        )
    }

    fn thresholds(entries: &[(&str, i64)]) -> ThresholdConfig {
        entries
            .iter()
            .map(|(id, t)| (id.to_string(), EntityThreshold::new(*t)))
            .collect()
    }

    #[test]
    fn test_site_a_below_threshold_no_event() {
        let s = snapshot((100, 40), &[("site-A", 40)]);
        assert!(evaluate(&s, &thresholds(&[("site-A", 50)])).is_empty());
    }

    #[test]
    fn test_site_a_above_threshold_one_event() {
        let s = snapshot((100, 60), &[("site-A", 60)]);
        let events = evaluate(&s, &thresholds(&[("site-A", 50)]));
        assert_eq!(
            events,
            vec![AlertEvent {
                entity_id: "site-A".to_string(),
                metric: "AP_used".to_string(),
                observed_value: 60,
                threshold_value: 50,
                timestamp: s.taken_at(),
                severity: Severity::Warning,
            }]
        );
    }

    #[test]
    fn test_equality_does_not_trigger() {
        let config = thresholds(&[("site-A", 50)]);
        assert!(evaluate(&snapshot((100, 50), &[("site-A", 50)]), &config).is_empty());
        assert_eq!(
            evaluate(&snapshot((100, 51), &[("site-A", 51)]), &config).len(),
            1
        );
    }

    #[test]
    fn test_disabled_and_unknown_entities_skipped() {
        let s = snapshot((100, 90), &[("site-A", 60), ("site-B", 30)]);
        let config = thresholds(&[("site-A", 0), ("site-B", -1), ("site-C", 5)]);
        assert!(evaluate(&s, &config).is_empty());
    }

    #[test]
    fn test_critical_when_pool_over_provisioned() {
        let s = snapshot((100, 104), &[("site-A", 70), ("site-B", 34)]);
        let events = evaluate(&s, &thresholds(&[("site-B", 20), ("site-A", 50)]));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].entity_id, "site-A");
        assert_eq!(events[1].entity_id, "site-B");
        assert!(events.iter().all(|e| e.severity == Severity::Critical));
    }

    #[test]
    fn test_evaluate_is_stateless() {
        let s = snapshot((100, 60), &[("site-A", 60)]);
        let config = thresholds(&[("site-A", 50)]);
        assert_eq!(evaluate(&s, &config), evaluate(&s, &config));
    }
}
