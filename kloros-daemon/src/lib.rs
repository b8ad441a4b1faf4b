//! Process bootstrap, shared wiring, and per-component binaries for the
//! evolutionary lifecycle core, run as a single process constructed at
//! startup and shut down at exit.
//!
//! Every long-running component lives under `src/bin/`; this library crate
//! holds what they share: tracing/OTel bootstrap, clock-skew and
//! emergency-stop checks, the niche topology loader, and `SharedContext`,
//! which assembles config, the bus, the registry, and every ledger stream
//! in one place.

pub mod bootstrap;
pub mod cli;
pub mod clock;
pub mod context;
pub mod emergency_stop;
pub mod error;
pub mod niches;
pub mod shutdown;
pub mod zooid_supervisor;

pub use context::SharedContext;
pub use error::{DaemonError, Result};
pub use zooid_supervisor::ZooidSupervisor;
