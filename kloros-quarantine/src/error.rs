//! Quarantine Monitor errors.

use thiserror::Error;

/// Result type for `kloros-quarantine` operations.
pub type Result<T> = std::result::Result<T, QuarantineError>;

/// Errors raised while tallying production failures or applying the
/// quarantine gate.
#[derive(Error, Debug)]
pub enum QuarantineError {
    /// The registry rejected a transaction or query.
    #[error(transparent)]
    Registry(#[from] kloros_registry::RegistryError),

    /// The lifecycle gate rejected a transition.
    #[error(transparent)]
    Lifecycle(#[from] kloros_lifecycle::LifecycleError),
}
