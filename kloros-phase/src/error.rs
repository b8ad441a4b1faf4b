//! PHASE Evaluator errors.

use thiserror::Error;

/// Result type for `kloros-phase` operations.
pub type Result<T> = std::result::Result<T, PhaseError>;

/// Errors raised while running a PHASE batch.
#[derive(Error, Debug)]
pub enum PhaseError {
    /// The sandboxed workload driver could not be spawned.
    #[error("failed to spawn workload driver {command}: {source}")]
    Spawn {
        /// Executable that failed to spawn.
        command: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The driver's stdout did not parse as a `DriverReport`.
    #[error("workload driver produced malformed output: {0}")]
    MalformedOutput(String),

    /// The registry rejected a transaction or query.
    #[error(transparent)]
    Registry(#[from] kloros_registry::RegistryError),

    /// The lifecycle gate rejected a transition.
    #[error(transparent)]
    Lifecycle(#[from] kloros_lifecycle::LifecycleError),

    /// Appending or reading a ledger stream failed.
    #[error(transparent)]
    Ledger(#[from] kloros_ledger::LedgerError),
}
