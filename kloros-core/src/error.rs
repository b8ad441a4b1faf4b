//! Error types shared by the data model.

use thiserror::Error;

/// Result type for `kloros-core` operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while constructing or validating core data model values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A record's `schema_version` major component is not understood by this build.
    #[error("unsupported schema major version: {0}")]
    UnsupportedSchemaVersion(String),

    /// A record's `schema_version` field did not parse as `MAJOR.MINOR`.
    #[error("malformed schema version: {0}")]
    MalformedSchemaVersion(String),

    /// A lifecycle transition was requested that the transition table forbids.
    #[error("illegal lifecycle transition: {from} -> {to}")]
    IllegalTransition {
        /// Originating state.
        from: String,
        /// Requested destination state.
        to: String,
    },
}
