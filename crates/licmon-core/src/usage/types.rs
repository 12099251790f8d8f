//! License usage data types built from appliance output.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// License types shown in the summary, in display order
pub const HEADLINE_TYPES: &[&str] = &["AP", "PEF", "RFP", "MM", "MC-VA-RW"];

/// Installed/used pair for a single license type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseCount {
    /// Licenses installed on the conductor
    pub total_installed: u64,
    /// Licenses currently consumed
    pub used: u64,
}

impl LicenseCount {
    /// Create a count pair
    pub fn new(total_installed: u64, used: u64) -> Self {
        Self {
            total_installed,
            used,
        }
    }

    /// Remaining licenses. Negative when the pool is over-provisioned.
    /// Saturates at the `i64` bounds for counts that do not fit.
    pub fn available(&self) -> i64 {
        let diff = i128::from(self.total_installed) - i128::from(self.used);
        diff.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    /// Usage percentage rounded to two decimals (0 when nothing is installed)
    pub fn usage_percent(&self) -> f64 {
        if self.total_installed == 0 {
            return 0.0;
        }
        let pct = self.used as f64 / self.total_installed as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }
}

/// One row of the license summary (flattened for display and reports)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LicenseSummaryItem {
    /// License type code (e.g. "AP")
    pub license_type: String,
    /// Installed count
    pub total_installed: u64,
    /// Used count
    pub used: u64,
    /// Installed minus used
    pub available: i64,
    /// Used / installed in percent
    pub usage_percent: f64,
}

impl LicenseSummaryItem {
    fn new(license_type: &str, count: LicenseCount) -> Self {
        Self {
            license_type: license_type.to_string(),
            total_installed: count.total_installed,
            used: count.used,
            available: count.available(),
            usage_percent: count.usage_percent(),
        }
    }
}

/// Point-in-time capture of license usage.
///
/// Immutable once built; identified by `taken_at`. The available count is
/// always derived from the installed/used pair and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseSnapshot {
    taken_at: DateTime<Utc>,
    licenses: BTreeMap<String, LicenseCount>,
    /// Per-client used counts, keyed by client hostname then license type
    clients: BTreeMap<String, BTreeMap<String, u64>>,
    connected_clients: u64,
}

impl LicenseSnapshot {
    /// Build a snapshot. The connected-client count is the number of clients.
    pub fn new(
        taken_at: DateTime<Utc>,
        licenses: BTreeMap<String, LicenseCount>,
        clients: BTreeMap<String, BTreeMap<String, u64>>,
    ) -> Self {
        let connected_clients = clients.len() as u64;
        Self {
            taken_at,
            licenses,
            clients,
            connected_clients,
        }
    }

    /// Capture timestamp (also the snapshot identity)
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Stable identifier derived from the timestamp, safe for file names
    pub fn id(&self) -> String {
        self.taken_at.format("%Y%m%dT%H%M%S%.6fZ").to_string()
    }

    /// All license types and their counts
    pub fn licenses(&self) -> &BTreeMap<String, LicenseCount> {
        &self.licenses
    }

    /// Counts for one license type
    pub fn license(&self, license_type: &str) -> Option<LicenseCount> {
        self.licenses.get(license_type).copied()
    }

    /// Available count for one license type (None if the type is unknown)
    pub fn available(&self, license_type: &str) -> Option<i64> {
        self.license(license_type).map(|c| c.available())
    }

    /// Per-client usage rows
    pub fn clients(&self) -> &BTreeMap<String, BTreeMap<String, u64>> {
        &self.clients
    }

    /// Used count of `license_type` reported for one client
    pub fn client_used(&self, client: &str, license_type: &str) -> Option<u64> {
        self.clients
            .get(client)
            .map(|row| row.get(license_type).copied().unwrap_or(0))
    }

    /// Number of distinct clients reporting usage
    pub fn connected_clients(&self) -> u64 {
        self.connected_clients
    }

    /// Summary of the headline license types, followed by any other types seen.
    ///
    /// Headline types missing from the snapshot report zero counts.
    pub fn summary(&self) -> Vec<LicenseSummaryItem> {
        let mut items: Vec<LicenseSummaryItem> = HEADLINE_TYPES
            .iter()
            .map(|t| LicenseSummaryItem::new(t, self.license(t).unwrap_or_default()))
            .collect();
        for (license_type, count) in &self.licenses {
            if !HEADLINE_TYPES.contains(&license_type.as_str()) {
                items.push(LicenseSummaryItem::new(license_type, *count));
            }
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_available_saturates_on_huge_counts() {
        assert_eq!(LicenseCount::new(u64::MAX, 0).available(), i64::MAX);
        assert_eq!(LicenseCount::new(0, u64::MAX).available(), i64::MIN);
        assert_eq!(LicenseCount::new(u64::MAX, u64::MAX - 5).available(), 5);
        assert_eq!(LicenseCount::new(100, 104).available(), -4);
    }

    fn snapshot_with(licenses: &[(&str, u64, u64)]) -> LicenseSnapshot {
        let licenses = licenses
            .iter()
            .map(|(t, total, used)| (t.to_string(), LicenseCount::new(*total, *used)))
            .collect();
        LicenseSnapshot::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap(),
            licenses,
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_available_is_total_minus_used() {
        for (total, used) in [(100, 40), (0, 0), (5, 5), (10, 0), (0, 7), (3, 250)] {
            let count = LicenseCount::new(total, used);
            assert_eq!(count.available(), total as i64 - used as i64);
        }
    }

    #[test]
    fn test_available_negative_when_over_provisioned() {
        let snapshot = snapshot_with(&[("AP", 10, 14)]);
        assert_eq!(snapshot.available("AP"), Some(-4));
        assert_eq!(snapshot.available("PEF"), None);
    }

    #[test]
    fn test_usage_percent() {
        assert_eq!(LicenseCount::new(3, 1).usage_percent(), 33.33);
        assert_eq!(LicenseCount::new(100, 40).usage_percent(), 40.0);
        assert_eq!(LicenseCount::new(0, 10).usage_percent(), 0.0);
    }

    #[test]
    fn test_summary_lists_headline_types_first() {
        let snapshot = snapshot_with(&[("ACR", 8, 2), ("AP", 100, 60), ("PEF", 50, 10)]);
        let summary = snapshot.summary();
        let types: Vec<&str> = summary.iter().map(|i| i.license_type.as_str()).collect();
        assert_eq!(types, vec!["AP", "PEF", "RFP", "MM", "MC-VA-RW", "ACR"]);
        assert_eq!(summary[0].available, 40);
        assert_eq!(summary[2].total_installed, 0);
        assert_eq!(summary[5].available, 6);
    }

    #[test]
    fn test_id_is_filename_safe() {
        let snapshot = snapshot_with(&[]);
        assert_eq!(snapshot.id(), "20260301T083000.000000Z");
    }

    #[test]
    fn test_client_used_defaults_missing_type_to_zero() {
        let mut row = BTreeMap::new();
        row.insert("AP".to_string(), 12);
        let mut clients = BTreeMap::new();
        clients.insert("site-A".to_string(), row);
        let snapshot = LicenseSnapshot::new(Utc::now(), BTreeMap::new(), clients);

        assert_eq!(snapshot.client_used("site-A", "AP"), Some(12));
        assert_eq!(snapshot.client_used("site-A", "PEF"), Some(0));
        assert_eq!(snapshot.client_used("site-B", "AP"), None);
        assert_eq!(snapshot.connected_clients(), 1);
    }
}
