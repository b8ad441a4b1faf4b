//! The lifecycle state machine: the only module allowed to change a
//! zooid's `lifecycle_state`. Every gate here is a pure
//! function from a zooid snapshot to a `TransitionRequest`; callers apply
//! it inside a `kloros_registry::Registry::transaction`.

pub mod error;
pub mod reason;
pub mod transition;

pub use error::{LifecycleError, Result};
pub use reason::{Reason, ServiceAction};
pub use transition::{
    apply, batch_start, catastrophic_fail, evaluate_graduation, orphan_eviction, promote, quarantine,
    retry, rollback_no_heartbeat, tournament_retire, GraduationVerdict, TransitionRequest,
};
