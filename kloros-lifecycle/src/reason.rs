//! Canonical transition reason strings, recorded on every `lifecycle_events`
//! row and published with each `zooid_state_change` signal.

use std::fmt;

/// Why a lifecycle transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// DORMANT -> PROBATION: the zooid was enqueued into a starting PHASE batch.
    BatchStart,
    /// PROBATION -> ACTIVE: the graduation gate passed.
    GraduationGate,
    /// PROBATION -> DORMANT: gate failed for insufficient evidence, non-catastrophic.
    InsufficientEvidence,
    /// PROBATION -> DORMANT: gate failed for low fitness, non-catastrophic.
    LowFitness,
    /// PROBATION -> RETIRED: fatal synthetic outcome (crash, stability breach).
    SyntheticCatastrophe,
    /// ACTIVE -> DORMANT: the quarantine monitor tripped on production failures.
    ProdGuardTrip,
    /// ACTIVE -> DORMANT: no heartbeat within `heartbeat_slo_sec` of promotion.
    RollbackNoHeartbeat,
    /// ACTIVE or PROBATION -> RETIRED: the demotion ceiling was exceeded.
    DemotionCeilingExceeded,
    /// DORMANT -> RETIRED: orphaned or duplicate-genome zooid evicted on reconciliation.
    OrphanEviction,
    /// ACTIVE -> RETIRED: lost the tournament selection too many consecutive ticks running.
    TournamentLossRetired,
}

impl Reason {
    /// The exact string stamped into persisted records.
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::BatchStart => "phase_batch_started",
            Reason::GraduationGate => "phase_threshold_met",
            Reason::InsufficientEvidence => "insufficient_evidence",
            Reason::LowFitness => "low_fitness",
            Reason::SyntheticCatastrophe => "synthetic_catastrophe",
            Reason::ProdGuardTrip => "prod_guard_trip",
            Reason::RollbackNoHeartbeat => "rollback_no_heartbeat",
            Reason::DemotionCeilingExceeded => "demotion_ceiling_exceeded",
            Reason::OrphanEviction => "orphan_eviction",
            Reason::TournamentLossRetired => "tournament_loss_retired",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Service lifecycle action requested alongside a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    /// Ask the external collaborator to start the zooid's service.
    Start,
    /// Ask the external collaborator to stop the zooid's service.
    Stop,
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceAction::Start => write!(f, "start"),
            ServiceAction::Stop => write!(f, "stop"),
        }
    }
}
