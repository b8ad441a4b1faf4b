//! Graduator errors.

use thiserror::Error;

/// Result type for `kloros-graduator` operations.
pub type Result<T> = std::result::Result<T, GraduatorError>;

/// Errors raised while aggregating PHASE fitness or applying the graduation
/// gate.
#[derive(Error, Debug)]
pub enum GraduatorError {
    /// A `governance.phase_batch_closed` envelope was missing an expected fact.
    #[error("phase_batch_closed envelope missing fact {0}")]
    MissingFact(&'static str),

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
