//! Bus errors.

use thiserror::Error;

/// Result type for `kloros-bus` operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors raised by ChemBus operations.
#[derive(Error, Debug)]
pub enum BusError {
    /// `unsubscribe` was called with a name that has no active subscription.
    #[error("no subscription registered under name {0}")]
    SubscriptionNotFound(String),

    /// A subscription with this name already exists.
    #[error("subscription {0} already registered")]
    DuplicateSubscription(String),
}
