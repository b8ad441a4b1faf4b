//! Daemon-level errors: config loading, directory bootstrap, and every
//! upstream crate's error folded in so `SharedContext::build` has one
//! `?`-able return type (taxonomy, collected at the binary edge).

use thiserror::Error;

/// Result type for `kloros-daemon` operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors raised assembling or running a component process.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("failed to create state directory {path}: {source}")]
    StateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("clock skew {skew_sec}s exceeds the {max_sec}s limit for a schedule-critical component")]
    ClockSkew { skew_sec: i64, max_sec: i64 },

    #[error(transparent)]
    Config(#[from] kloros_config::ConfigError),

    #[error(transparent)]
    Bus(#[from] kloros_bus::BusError),

    #[error(transparent)]
    Registry(#[from] kloros_registry::RegistryError),

    #[error(transparent)]
    Ledger(#[from] kloros_ledger::LedgerError),

    #[error(transparent)]
    Bioreactor(#[from] kloros_bioreactor::BioreactorError),

    #[error(transparent)]
    Phase(#[from] kloros_phase::PhaseError),

    #[error(transparent)]
    Graduator(#[from] kloros_graduator::GraduatorError),

    #[error(transparent)]
    Quarantine(#[from] kloros_quarantine::QuarantineError),

    #[error(transparent)]
    Scheduler(#[from] kloros_scheduler::SchedulerError),

    #[error(transparent)]
    Historian(#[from] kloros_historian::HistorianError),

    #[error(transparent)]
    Introspection(#[from] kloros_introspection::IntrospectionError),
}
