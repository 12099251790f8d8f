//! Public API layer (facade) for licmon-core.
//!
//! This module provides [`LicenseMonitor`], a high-level entry-point that
//! owns the cycle pipeline, the threshold configuration and the scheduler,
//! and exposes typed query/action methods. Consumers never touch the poller
//! state or the lock directly.
//!
//! # Quick Start
//!
//! ```ignore
//! use licmon_core::api::{LicenseMonitorBuilder, StartOutcome};
//!
//! let monitor = LicenseMonitorBuilder::new(settings).build()?;
//!
//! // Only one process per lock path polls
//! if let StartOutcome::Failed { reason } = monitor.start_polling() {
//!     println!("standby: {reason}");
//! }
//!
//! let latest = monitor.latest_snapshot()?;
//! let mut rx = monitor.subscribe();
//! ```

mod actions;
mod builder;
mod core;
pub mod events;
mod queries;
pub mod types;

pub use builder::LicenseMonitorBuilder;
pub use core::LicenseMonitor;
pub use events::CoreEvent;
pub use types::{ApiError, ManualCycle, RejectReason, StartOutcome};
