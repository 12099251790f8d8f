//! licmon-core: license usage polling for Aruba mobility conductors.
//!
//! The crate is organised leaves-first:
//!
//! - [`session`]: authenticated REST session against the appliance
//! - [`usage`]: parsing raw command output into [`usage::LicenseSnapshot`]
//! - [`store`]: atomic on-disk snapshot history, thresholds and poll interval
//! - [`alerts`]: per-entity threshold evaluation
//! - [`notify`]: mail/syslog dispatch with re-notify suppression
//! - [`monitor`]: the singleton poll scheduler and its host-wide lock
//! - [`state`]: scheduler state shared with readers
//! - [`config`]: CLI arguments and TOML settings
//! - [`api`]: the [`api::LicenseMonitor`] facade used by every consumer

pub mod alerts;
pub mod api;
pub mod config;
pub mod monitor;
pub mod notify;
pub mod session;
pub mod state;
pub mod store;
pub mod usage;
