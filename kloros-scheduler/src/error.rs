//! Scheduler errors.

use thiserror::Error;

/// Result type for `kloros-scheduler` operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors raised driving the named-schedule tick loop.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A bus subscription or emission failed.
    #[error(transparent)]
    Bus(#[from] kloros_bus::BusError),
}
