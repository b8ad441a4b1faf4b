//! Bioreactor errors.

use thiserror::Error;

/// Result type for `kloros-bioreactor` operations.
pub type Result<T> = std::result::Result<T, BioreactorError>;

/// Errors raised while differentiating, registering, or running a
/// tournament round.
#[derive(Error, Debug)]
pub enum BioreactorError {
    /// The registry rejected a transaction (invariant violation or lock contention).
    #[error(transparent)]
    Registry(#[from] kloros_registry::RegistryError),

    /// The lifecycle gate rejected a requested transition.
    #[error(transparent)]
    Lifecycle(#[from] kloros_lifecycle::LifecycleError),

    /// Appending to `phase_queue` failed.
    #[error(transparent)]
    Ledger(#[from] kloros_ledger::LedgerError),

    /// A phenotype failed to canonicalize for hashing.
    #[error("failed to canonicalize phenotype: {0}")]
    Canonicalize(#[from] serde_json::Error),

    /// The loss-tracker's or phenotype store's backing store failed.
    #[error("bioreactor store error: {0}")]
    Store(#[from] sled::Error),

    /// A stored phenotype failed to (de)serialize.
    #[error("phenotype (de)serialization error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),
}
