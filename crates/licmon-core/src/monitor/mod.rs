//! The poll scheduler, its cycle pipeline and the host-wide singleton lock.

pub mod cycle;
pub mod lock;
pub mod poller;

#[cfg(test)]
pub(crate) mod testing;

pub use cycle::{ApplianceTarget, CycleError, CycleReport, CycleRunner};
pub use lock::{LockError, SingletonLock};
pub use poller::{Command, Scheduler, SchedulerControl, SchedulerHandle, SharedThresholds};
