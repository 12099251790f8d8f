//! Threshold configuration and alert event types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric name for the per-entity AP-used comparison
pub const AP_USED_METRIC: &str = "AP_used";

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Entity is over its threshold
    Warning,
    /// Entity is over its threshold and the AP pool is over-provisioned
    Critical,
}

impl Severity {
    /// Lowercase label used in messages and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-entity alert settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityThreshold {
    /// Alert when AP usage is strictly above this; zero or less disables
    pub ap_threshold: i64,
    /// Send through the mail relay
    #[serde(default)]
    pub notify_email: bool,
    /// Send through the syslog relay
    #[serde(default)]
    pub notify_syslog: bool,
}

impl EntityThreshold {
    /// Create a threshold with both channels opted out
    pub fn new(ap_threshold: i64) -> Self {
        Self {
            ap_threshold,
            notify_email: false,
            notify_syslog: false,
        }
    }

    /// Opt in to the mail relay
    pub fn with_email(mut self) -> Self {
        self.notify_email = true;
        self
    }

    /// Opt in to the syslog relay
    pub fn with_syslog(mut self) -> Self {
        self.notify_syslog = true;
        self
    }

    /// Whether this entity is evaluated at all
    pub fn is_enabled(&self) -> bool {
        self.ap_threshold > 0
    }
}

/// Thresholds keyed by entity id (client hostname).
///
/// Shared behind an `Arc` and replaced whole; never mutated while shared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdConfig {
    entities: BTreeMap<String, EntityThreshold>,
}

impl ThresholdConfig {
    /// Empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Threshold for one entity
    pub fn get(&self, entity_id: &str) -> Option<&EntityThreshold> {
        self.entities.get(entity_id)
    }

    /// Insert or replace an entity's threshold
    pub fn insert(&mut self, entity_id: impl Into<String>, threshold: EntityThreshold) {
        self.entities.insert(entity_id.into(), threshold);
    }

    /// Remove an entity; returns the old threshold if any
    pub fn remove(&mut self, entity_id: &str) -> Option<EntityThreshold> {
        self.entities.remove(entity_id)
    }

    /// Iterate entities in id order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntityThreshold)> {
        self.entities.iter()
    }

    /// Number of configured entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when no entity is configured
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Check entity ids are usable
    pub fn validate(&self) -> Result<(), String> {
        for id in self.entities.keys() {
            validate_entity_id(id)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, EntityThreshold)> for ThresholdConfig {
    fn from_iter<I: IntoIterator<Item = (String, EntityThreshold)>>(iter: I) -> Self {
        Self {
            entities: iter.into_iter().collect(),
        }
    }
}

/// Entity ids are client hostnames: non-empty, no surrounding whitespace
pub fn validate_entity_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("entity id must not be empty".to_string());
    }
    if id.trim() != id {
        return Err(format!("entity id '{}' has surrounding whitespace", id));
    }
    if id.chars().any(|c| c.is_control()) {
        return Err(format!("entity id {:?} contains control characters", id));
    }
    Ok(())
}

/// A threshold breach found in one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Entity (client hostname) that breached
    pub entity_id: String,
    /// Metric name, e.g. `AP_used`
    pub metric: String,
    /// Value read from the snapshot
    pub observed_value: i64,
    /// Configured threshold
    pub threshold_value: i64,
    /// Snapshot timestamp
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub severity: Severity,
}

impl AlertEvent {
    /// Key used for deduplication
    pub fn key(&self) -> (String, String) {
        (self.entity_id.clone(), self.metric.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_threshold_config_json_shape() {
        let mut config = ThresholdConfig::new();
        config.insert("site-A", EntityThreshold::new(50).with_email());

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "site-A": {"ap_threshold": 50, "notify_email": true, "notify_syslog": false}
            })
        );

        let back: ThresholdConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_channel_flags_default_off() {
        let config: ThresholdConfig =
            serde_json::from_str(r#"{"site-B": {"ap_threshold": 10}}"#).unwrap();
        let t = config.get("site-B").unwrap();
        assert!(!t.notify_email);
        assert!(!t.notify_syslog);
        assert!(t.is_enabled());
    }

    #[test]
    fn test_non_positive_threshold_is_disabled() {
        assert!(!EntityThreshold::new(0).is_enabled());
        assert!(!EntityThreshold::new(-3).is_enabled());
        assert!(EntityThreshold::new(1).is_enabled());
    }

    #[test]
    fn test_validate_entity_ids() {
        assert!(validate_entity_id("site-A").is_ok());
        assert!(validate_entity_id("").is_err());
        assert!(validate_entity_id(" site-A").is_err());
        assert!(validate_entity_id("site\nA").is_err());

        let mut config = ThresholdConfig::new();
        config.insert("ok", EntityThreshold::new(1));
        assert!(config.validate().is_ok());
        config.insert("", EntityThreshold::new(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(Severity::Warning.to_string(), "warning");
    }
}
