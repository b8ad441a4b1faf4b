//! Registry errors.

use kloros_core::GenomeHash;
use thiserror::Error;

/// Result type for `kloros-registry` operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors raised while loading, querying, or mutating the registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The on-disk snapshot failed an invariant check at load time. Fatal to
    /// startup.
    #[error("registry snapshot is corrupt: {0}")]
    CorruptRegistry(String),

    /// A `transaction` closure's mutation would break a registry invariant;
    /// the transaction is aborted and nothing is written.
    #[error("registry invariant violated: {0}")]
    InvariantViolation(String),

    /// The global coordination lock is already held by another process.
    #[error("global coordination lock is held by another process")]
    LockHeld,

    /// A requested zooid name does not exist.
    #[error("no such zooid: {0}")]
    NotFound(String),

    /// A genome hash is not present in the genome index.
    #[error("no zooid owns genome {0}")]
    GenomeNotFound(GenomeHash),

    /// The lifecycle state machine rejected a requested transition.
    #[error(transparent)]
    Lifecycle(#[from] kloros_lifecycle::LifecycleError),

    /// Underlying I/O failure writing or reading a snapshot.
    #[error("registry I/O error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Snapshot body failed to (de)serialize.
    #[error("registry snapshot (de)serialization error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),
}

impl RegistryError {
    /// Build an `InvariantViolation` naming the broken rule, matching
    /// `Registry::transaction`'s contract for validation failures.
    pub fn invariant(rule: impl Into<String>) -> Self {
        RegistryError::InvariantViolation(rule.into())
    }
}
