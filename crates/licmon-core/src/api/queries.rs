//! Read-only query methods on [`LicenseMonitor`].
//!
//! Every method returns owned data; callers never hold a lock.

use super::core::LicenseMonitor;
use super::types::ApiError;
use crate::alerts::ThresholdConfig;
use crate::state::PollerState;
use crate::usage::{LicenseSnapshot, LicenseSummaryItem};

impl LicenseMonitor {
    /// Most recent stored snapshot
    pub fn latest_snapshot(&self) -> Result<Option<LicenseSnapshot>, ApiError> {
        Ok(self.runner().store().latest()?)
    }

    /// Stored snapshots, newest first, at most `limit` of them
    pub fn history(&self, limit: usize) -> Result<Vec<LicenseSnapshot>, ApiError> {
        Ok(self.runner().store().history_limited(limit)?)
    }

    /// Copy of the scheduler state
    pub fn poller_status(&self) -> PollerState {
        self.state().read().clone()
    }

    /// Thresholds in effect for the next cycle
    pub fn thresholds(&self) -> ThresholdConfig {
        (**self.shared_thresholds().read()).clone()
    }

    /// Per-type summary of the latest snapshot, empty when none is stored
    pub fn license_summary(&self) -> Result<Vec<LicenseSummaryItem>, ApiError> {
        Ok(self
            .latest_snapshot()?
            .map(|s| s.summary())
            .unwrap_or_default())
    }
}
