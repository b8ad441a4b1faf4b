//! Introspection errors.

use thiserror::Error;

/// Result type for `kloros-introspection` operations.
pub type Result<T> = std::result::Result<T, IntrospectionError>;

/// Errors raised running scanners or emitting their findings.
#[derive(Error, Debug)]
pub enum IntrospectionError {
    /// A bus emission failed.
    #[error(transparent)]
    Bus(#[from] kloros_bus::BusError),
}
