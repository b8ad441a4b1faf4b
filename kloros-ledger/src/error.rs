//! Ledger errors.

use thiserror::Error;

/// Result type for `kloros-ledger` operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors raised while signing, verifying, or persisting ledger records.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// An `OBSERVATION` envelope's HMAC did not verify against any key in
    /// the ring.
    #[error("signature verification failed")]
    SignatureError,

    /// The underlying append-only store failed.
    #[error("ledger store error: {0}")]
    Store(#[from] sled::Error),

    /// A stored record failed to (de)serialize.
    #[error("ledger record (de)serialization error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),

    /// A facts payload could not be canonicalized to JSON for signing.
    #[error("failed to canonicalize facts for signing: {0}")]
    Canonicalize(#[from] serde_json::Error),

    /// Persisting a ledger record failed after the store write succeeded,
    /// e.g. while rolling up `prod.*` onto the registry.
    #[error("registry error while rolling up ledger state: {0}")]
    Registry(#[from] kloros_registry::RegistryError),
}
