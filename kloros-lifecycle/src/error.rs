//! Lifecycle transition errors.

use kloros_core::LifecycleState;
use thiserror::Error;

/// Result type for `kloros-lifecycle` operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Errors raised while gating or applying a lifecycle transition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    /// The transition table forbids moving between these two states.
    #[error("illegal lifecycle transition: {from} -> {to}")]
    IllegalTransition {
        /// Originating state.
        from: LifecycleState,
        /// Requested destination state.
        to: LifecycleState,
    },

    /// A gate was invoked against a zooid not in the state it requires.
    #[error("gate {gate} requires state {expected}, found {actual}")]
    WrongState {
        /// Name of the gate that was invoked.
        gate: &'static str,
        /// The state the gate requires.
        expected: LifecycleState,
        /// The zooid's actual state.
        actual: LifecycleState,
    },

    /// `batch_start` was invoked on a zooid still serving a quarantine cooldown.
    #[error("zooid is in quarantine cooldown until {until}")]
    InCooldown {
        /// Cooldown expiry.
        until: chrono::DateTime<chrono::Utc>,
    },

    /// Applying the transition would violate the core data model invariants.
    #[error("transition violates core invariant: {0}")]
    InvariantViolation(#[from] kloros_core::CoreError),
}
