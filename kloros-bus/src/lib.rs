//! ChemBus: the pub/sub signal bus carrying observations, triggers,
//! heartbeats, and governance events between lifecycle-core components.

pub mod bus;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod mailbox;
pub mod rate_limit;
pub mod topic;

pub use bus::{
    ChemBus, DEFAULT_PUBLISHER_RATE_PER_SEC, DEFAULT_QUARANTINE_THRESHOLD, DEFAULT_QUEUE_CAPACITY,
};
pub use envelope::{Envelope, Facts};
pub use error::{BusError, Result};
pub use handler::SignalHandler;
pub use topic::is_critical;

/// Canonical signal labels.
pub mod signals {
    /// Zooid incident outcome report. Carries an HMAC `signature`.
    pub const OBSERVATION: &str = "OBSERVATION";
    /// Liveness emitted periodically by ACTIVE zooids.
    pub const HEARTBEAT: &str = "HEARTBEAT";
    /// Scheduler 1Hz heartbeat.
    pub const SCHEDULE_TICK: &str = "Q_SCHEDULE_TICK";
    /// Prefix for scheduler-emitted periodic triggers.
    pub const TRIGGER_PREFIX: &str = "Q_TRIGGER_";
    /// Per-component periodic self-report.
    pub const METRICS_SUMMARY: &str = "METRICS_SUMMARY";
    /// Scanner finding.
    pub const CAPABILITY_GAP_FOUND: &str = "CAPABILITY_GAP_FOUND";
    /// Prefix for operational meta-signals.
    pub const GOVERNANCE_PREFIX: &str = "governance.";
    /// Published alongside every `lifecycle_events` append.
    pub const ZOOID_STATE_CHANGE: &str = "governance.zooid_state_change";
    /// A PHASE batch was opened (zooids moved DORMANT -> PROBATION).
    pub const PHASE_BATCH_STARTED: &str = "governance.phase_batch_started";
    /// A PHASE batch closed; the Graduator should evaluate its candidates.
    pub const PHASE_BATCH_CLOSED: &str = "governance.phase_batch_closed";
    /// A niche has no `catastrophic_rule` configured, so judging falls back
    /// to crash-count only.
    pub const CATASTROPHIC_RULE_MISSING: &str = "governance.catastrophic_rule_missing";
    /// The Quarantine Monitor tripped a zooid out of ACTIVE.
    pub const QUARANTINE_TRIPPED: &str = "governance.quarantine_tripped";
    /// A promoted zooid never heartbeat within its SLO and was rolled back.
    pub const ROLLBACK_NO_HEARTBEAT: &str = "governance.rollback_no_heartbeat";
    /// A bus-history segment was rotated by the Historian.
    pub const HISTORY_ROTATED: &str = "governance.history_rotated";
    /// A bus-history window was consolidated into episodic storage.
    pub const HISTORY_CONSOLIDATED: &str = "governance.history_consolidated";
    /// Prefix for affective-state signals driving adaptive scheduling.
    pub const AFFECT_PREFIX: &str = "AFFECT_";
    /// Sustained cognitive/resource fatigue; slows non-critical schedules.
    pub const AFFECT_CRITICAL_FATIGUE: &str = "AFFECT_CRITICAL_FATIGUE";
    /// Elevated system wellbeing; speeds up non-critical schedules.
    pub const AFFECT_WELLBEING_HIGH: &str = "AFFECT_WELLBEING_HIGH";
    /// Resource-strain warning, informational for schedulers and scanners.
    pub const AFFECT_RESOURCE_STRAIN: &str = "AFFECT_RESOURCE_STRAIN";
}
