//! The transition table and the gates that populate a
//! [`TransitionRequest`]. `kloros-lifecycle` is the only module allowed to
//! change `lifecycle_state`; callers (Registry, Graduator, Quarantine
//! Monitor) build a request with a gate function and apply it inside a
//! registry transaction.

use crate::error::{LifecycleError, Result};
use crate::reason::{Reason, ServiceAction};
use chrono::{DateTime, Utc};
use kloros_config::PolicyDefaults;
use kloros_core::{LifecycleState, Zooid};

/// A pending lifecycle transition, computed by a gate and not yet applied.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    /// Destination state.
    pub to: LifecycleState,
    /// Why this transition is happening.
    pub reason: Reason,
    /// When the transition takes effect.
    pub now: DateTime<Utc>,
    /// Service start/stop request for the external collaborator, if any.
    pub service_action: Option<ServiceAction>,
    /// Increment applied to `demotions`.
    pub demotions_delta: u32,
    /// Increment applied to `probation_attempts`.
    pub probation_attempts_delta: u32,
    /// New `quarantine_until`, if this transition opens a cooldown.
    pub quarantine_until: Option<DateTime<Utc>>,
    /// Stamps `promoted_ts`, on PROBATION -> ACTIVE only.
    pub promoted_ts: Option<DateTime<Utc>>,
}

fn table_allows(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::*;
    matches!(
        (from, to),
        (Dormant, Probation)
            | (Dormant, Retired)
            | (Probation, Dormant)
            | (Probation, Active)
            | (Probation, Retired)
            | (Active, Dormant)
            | (Active, Retired)
    )
}

/// Apply a computed request to a zooid, enforcing the transition table and
/// the core invariants (invariant 6: RETIRED is terminal).
pub fn apply(zooid: &mut Zooid, req: TransitionRequest) -> Result<()> {
    if !table_allows(zooid.lifecycle_state, req.to) {
        return Err(LifecycleError::IllegalTransition {
            from: zooid.lifecycle_state,
            to: req.to,
        });
    }

    zooid.lifecycle_state = req.to;
    zooid.last_transition_ts = req.now;
    zooid.demotions += req.demotions_delta;
    zooid.probation_attempts += req.probation_attempts_delta;

    if let Some(promoted_ts) = req.promoted_ts {
        zooid.promoted_ts = Some(promoted_ts);
    }
    if let Some(quarantine_until) = req.quarantine_until {
        zooid.quarantine_until = Some(quarantine_until);
    }
    if req.to == LifecycleState::Retired {
        zooid.retired_ts = Some(req.now);
    }

    zooid.check_monotonic_timestamps()?;
    Ok(())
}

fn require_state(gate: &'static str, zooid: &Zooid, expected: LifecycleState) -> Result<()> {
    if zooid.lifecycle_state != expected {
        return Err(LifecycleError::WrongState {
            gate,
            expected,
            actual: zooid.lifecycle_state,
        });
    }
    Ok(())
}

/// DORMANT -> PROBATION: a PHASE batch is starting and selected this zooid.
pub fn batch_start(zooid: &Zooid, now: DateTime<Utc>) -> Result<TransitionRequest> {
    require_state("batch_start", zooid, LifecycleState::Dormant)?;
    if zooid.in_cooldown(now) {
        return Err(LifecycleError::InCooldown {
            until: zooid.quarantine_until.unwrap(),
        });
    }
    Ok(TransitionRequest {
        to: LifecycleState::Probation,
        reason: Reason::BatchStart,
        now,
        service_action: None,
        demotions_delta: 0,
        probation_attempts_delta: 1,
        quarantine_until: None,
        promoted_ts: None,
    })
}

/// The three possible outcomes of the graduation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraduationVerdict {
    /// `fitness_mean >= phase_threshold` and `evidence >= min_phase_evidence`
    /// and no outstanding production guard failures.
    Promote,
    /// Evidence count below `policy.min_phase_evidence`.
    RetryInsufficientEvidence,
    /// Fitness below `policy.phase_threshold` with sufficient evidence.
    RetryLowFitness,
}

/// Evaluate the graduation gate against a PROBATION candidate's current
/// `phase` snapshot.
pub fn evaluate_graduation(
    zooid: &Zooid,
    policy: &PolicyDefaults,
    prod_guard_failures: u32,
) -> GraduationVerdict {
    if zooid.phase.evidence < policy.min_phase_evidence {
        return GraduationVerdict::RetryInsufficientEvidence;
    }
    if zooid.phase.fitness_mean < policy.phase_threshold {
        return GraduationVerdict::RetryLowFitness;
    }
    if prod_guard_failures > 0 {
        return GraduationVerdict::RetryLowFitness;
    }
    GraduationVerdict::Promote
}

/// PROBATION -> ACTIVE: graduation gate passed.
pub fn promote(zooid: &Zooid, now: DateTime<Utc>) -> Result<TransitionRequest> {
    require_state("promote", zooid, LifecycleState::Probation)?;
    Ok(TransitionRequest {
        to: LifecycleState::Active,
        reason: Reason::GraduationGate,
        now,
        service_action: Some(ServiceAction::Start),
        demotions_delta: 0,
        probation_attempts_delta: 0,
        quarantine_until: None,
        promoted_ts: Some(now),
    })
}

/// PROBATION -> DORMANT: non-catastrophic retry ("Retry").
pub fn retry(
    zooid: &Zooid,
    verdict: GraduationVerdict,
    now: DateTime<Utc>,
) -> Result<TransitionRequest> {
    require_state("retry", zooid, LifecycleState::Probation)?;
    let reason = match verdict {
        GraduationVerdict::RetryInsufficientEvidence => Reason::InsufficientEvidence,
        GraduationVerdict::RetryLowFitness => Reason::LowFitness,
        GraduationVerdict::Promote => {
            unreachable!("retry() called with a passing verdict")
        }
    };
    Ok(TransitionRequest {
        to: LifecycleState::Dormant,
        reason,
        now,
        service_action: None,
        demotions_delta: 0,
        probation_attempts_delta: 0,
        quarantine_until: None,
        promoted_ts: None,
    })
}

/// PROBATION -> RETIRED: a fatal synthetic outcome, e.g. three crashes in
/// the same batch.
pub fn catastrophic_fail(zooid: &Zooid, now: DateTime<Utc>) -> Result<TransitionRequest> {
    require_state("catastrophic_fail", zooid, LifecycleState::Probation)?;
    Ok(TransitionRequest {
        to: LifecycleState::Retired,
        reason: Reason::SyntheticCatastrophe,
        now,
        service_action: None,
        demotions_delta: 0,
        probation_attempts_delta: 0,
        quarantine_until: None,
        promoted_ts: None,
    })
}

/// Compute the exponential backoff cooldown for a demotion:
/// `quarantine_window_sec * 2^min(demotions_after, cap)`.
fn backoff_cooldown(
    quarantine_window_sec: u64,
    demotions_after: u32,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    const CAP: u32 = 6;
    let exponent = demotions_after.min(CAP);
    let multiplier = 1u64 << exponent;
    now + chrono::Duration::seconds((quarantine_window_sec * multiplier) as i64)
}

/// ACTIVE -> DORMANT (or RETIRED past the ceiling): the quarantine monitor
/// tripped on repeated production failures.
pub fn quarantine(
    zooid: &Zooid,
    policy: &PolicyDefaults,
    now: DateTime<Utc>,
) -> Result<TransitionRequest> {
    demotion_transition(zooid, policy, Reason::ProdGuardTrip, now)
}

/// ACTIVE -> DORMANT (or RETIRED past the ceiling): no heartbeat arrived
/// within `heartbeat_slo_sec` of promotion ("Graduation gate").
pub fn rollback_no_heartbeat(
    zooid: &Zooid,
    policy: &PolicyDefaults,
    now: DateTime<Utc>,
) -> Result<TransitionRequest> {
    demotion_transition(zooid, policy, Reason::RollbackNoHeartbeat, now)
}

fn demotion_transition(
    zooid: &Zooid,
    policy: &PolicyDefaults,
    reason: Reason,
    now: DateTime<Utc>,
) -> Result<TransitionRequest> {
    require_state("quarantine", zooid, LifecycleState::Active)?;

    if zooid.demotions >= policy.demotion_ceiling {
        return Ok(TransitionRequest {
            to: LifecycleState::Retired,
            reason: Reason::DemotionCeilingExceeded,
            now,
            service_action: Some(ServiceAction::Stop),
            demotions_delta: 0,
            probation_attempts_delta: 0,
            quarantine_until: None,
            promoted_ts: None,
        });
    }

    let demotions_after = zooid.demotions + 1;
    let quarantine_until = backoff_cooldown(policy.quarantine_window_sec, demotions_after, now);
    Ok(TransitionRequest {
        to: LifecycleState::Dormant,
        reason,
        now,
        service_action: Some(ServiceAction::Stop),
        demotions_delta: 1,
        probation_attempts_delta: 0,
        quarantine_until: Some(quarantine_until),
        promoted_ts: None,
    })
}

/// DORMANT -> RETIRED: orphaned or duplicate-genome zooid evicted during
/// registry reconciliation ("Reconciliation on load").
pub fn orphan_eviction(zooid: &Zooid, now: DateTime<Utc>) -> Result<TransitionRequest> {
    require_state("orphan_eviction", zooid, LifecycleState::Dormant)?;
    Ok(TransitionRequest {
        to: LifecycleState::Retired,
        reason: Reason::OrphanEviction,
        now,
        service_action: None,
        demotions_delta: 0,
        probation_attempts_delta: 0,
        quarantine_until: None,
        promoted_ts: None,
    })
}

/// ACTIVE -> RETIRED: the Bioreactor's tournament policy predicate tripped
/// after too many consecutive losing rounds ("policy
/// predicate ... says to retire").
pub fn tournament_retire(zooid: &Zooid, now: DateTime<Utc>) -> Result<TransitionRequest> {
    require_state("tournament_retire", zooid, LifecycleState::Active)?;
    Ok(TransitionRequest {
        to: LifecycleState::Retired,
        reason: Reason::TournamentLossRetired,
        now,
        service_action: Some(ServiceAction::Stop),
        demotions_delta: 0,
        probation_attempts_delta: 0,
        quarantine_until: None,
        promoted_ts: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kloros_core::{GenomeHash, NicheKey, PhaseSnapshot, PolicyOverrides, ProdSnapshot};

    fn dormant_zooid() -> Zooid {
        let now = Utc::now();
        Zooid {
            schema_version: "1.0".into(),
            name: "lm_001".into(),
            genome_hash: GenomeHash::of(b"src", b"pheno"),
            niche: NicheKey::new("queue_management", "latency_monitoring"),
            lifecycle_state: LifecycleState::Dormant,
            entered_ts: now,
            promoted_ts: None,
            last_transition_ts: now,
            retired_ts: None,
            parent_lineage: vec![],
            phase: PhaseSnapshot::default(),
            prod: ProdSnapshot::default(),
            demotions: 0,
            probation_attempts: 0,
            quarantine_until: None,
            policy: PolicyOverrides::default(),
            signature: "sig".into(),
        }
    }

    #[test]
    fn batch_start_moves_dormant_to_probation() {
        let z = dormant_zooid();
        let req = batch_start(&z, Utc::now()).unwrap();
        assert_eq!(req.to, LifecycleState::Probation);
    }

    #[test]
    fn batch_start_rejects_cooldown() {
        let mut z = dormant_zooid();
        z.quarantine_until = Some(Utc::now() + chrono::Duration::seconds(60));
        assert!(batch_start(&z, Utc::now()).is_err());
    }

    #[test]
    fn graduation_gate_promotes_at_exact_thresholds() {
        let mut z = dormant_zooid();
        z.lifecycle_state = LifecycleState::Probation;
        z.phase.fitness_mean = 0.70;
        z.phase.evidence = 50;
        let policy = PolicyDefaults::default();
        let verdict = evaluate_graduation(&z, &policy, 0);
        assert_eq!(verdict, GraduationVerdict::Promote);

        let mut applied = z.clone();
        apply(&mut applied, promote(&z, Utc::now()).unwrap()).unwrap();
        assert_eq!(applied.lifecycle_state, LifecycleState::Active);
        assert!(applied.promoted_ts.is_some());
    }

    #[test]
    fn demotion_at_the_ceiling_still_goes_to_dormant() {
        let mut z = dormant_zooid();
        z.lifecycle_state = LifecycleState::Active;
        z.demotions = 1;
        let policy = PolicyDefaults {
            demotion_ceiling: 2,
            ..PolicyDefaults::default()
        };
        let req = quarantine(&z, &policy, Utc::now()).unwrap();
        assert_eq!(req.to, LifecycleState::Dormant);
        assert_eq!(req.demotions_delta, 1);
    }

    #[test]
    fn demotion_past_the_ceiling_retires_instead_of_dormant() {
        let mut z = dormant_zooid();
        z.lifecycle_state = LifecycleState::Active;
        z.demotions = 2;
        let policy = PolicyDefaults {
            demotion_ceiling: 2,
            ..PolicyDefaults::default()
        };
        let req = quarantine(&z, &policy, Utc::now()).unwrap();
        assert_eq!(req.to, LifecycleState::Retired);
        assert_eq!(req.reason, Reason::DemotionCeilingExceeded);
    }

    #[test]
    fn retired_is_terminal() {
        let mut z = dormant_zooid();
        z.lifecycle_state = LifecycleState::Retired;
        let req = TransitionRequest {
            to: LifecycleState::Dormant,
            reason: Reason::OrphanEviction,
            now: Utc::now(),
            service_action: None,
            demotions_delta: 0,
            probation_attempts_delta: 0,
            quarantine_until: None,
            promoted_ts: None,
        };
        assert!(apply(&mut z, req).is_err());
    }
}
