//! The Scheduler: named schedule table driving periodic triggers across the
//! lifecycle core on independent wall-clock cadences.

pub mod error;
pub mod scheduler;

pub use error::{Result, SchedulerError};
pub use scheduler::Scheduler;
