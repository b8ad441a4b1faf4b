//! The Zooid value object.

use crate::error::{CoreError, Result};
use crate::genome::GenomeHash;
use crate::niche::NicheKey;
use crate::schema::CURRENT_SCHEMA_VERSION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four lifecycle states a zooid occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Freshly spawned or returned from a failed probation / quarantine.
    Dormant,
    /// Currently being evaluated by a PHASE batch.
    Probation,
    /// Serving real production signals.
    Active,
    /// Terminal: no further transitions leave this state.
    Retired,
}

impl LifecycleState {
    /// All four states, in a fixed order used for niche-index iteration.
    pub const ALL: [LifecycleState; 4] = [
        LifecycleState::Dormant,
        LifecycleState::Probation,
        LifecycleState::Active,
        LifecycleState::Retired,
    ];
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Dormant => "DORMANT",
            LifecycleState::Probation => "PROBATION",
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Retired => "RETIRED",
        };
        write!(f, "{s}")
    }
}

/// Synthetic (PHASE) fitness snapshot carried on the zooid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    /// PHASE batch IDs this zooid has participated in.
    pub batches: Vec<String>,
    /// Decay-weighted evidence count contributing to `fitness_mean`.
    pub evidence: u32,
    /// Decay-weighted mean composite fitness in `[0, 1]`.
    pub fitness_mean: f64,
    /// 95% confidence interval half-width around `fitness_mean`.
    pub fitness_ci95: f64,
    /// When the current PROBATION window started.
    pub started_ts: Option<DateTime<Utc>>,
    /// When the current PROBATION window's aggregation completed.
    pub completed_ts: Option<DateTime<Utc>>,
}

/// Production fitness snapshot, derived by the Ledger Writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProdSnapshot {
    /// Number of production observations rolled up.
    pub evidence: u64,
    /// Fraction of observations with `ok == true`.
    pub ok_rate: f64,
    /// Mean time-to-resolution in milliseconds.
    pub ttr_ms_mean: f64,
    /// Timestamp of the most recent rolled-up observation.
    pub last_ts: Option<DateTime<Utc>>,
}

/// Per-zooid policy overrides (; defaults live in niche-level policy,
/// see `kloros-config`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyOverrides {
    /// Override for `phase_threshold`.
    pub phase_threshold: Option<f64>,
    /// Override for `min_phase_evidence`.
    pub min_phase_evidence: Option<u32>,
    /// Override for `demotion_ceiling`.
    pub demotion_ceiling: Option<u32>,
    /// Override for `quarantine_window_sec`.
    pub quarantine_window_sec: Option<u64>,
    /// Override for `phase_half_life_sec`.
    pub phase_half_life_sec: Option<u64>,
    /// Override for `heartbeat_slo_sec`.
    pub heartbeat_slo_sec: Option<u64>,
}

/// The unit of evolved code managed by the lifecycle core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zooid {
    /// Schema version of this record.
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Unique name.
    pub name: String,
    /// Content hash of code + phenotype.
    pub genome_hash: GenomeHash,
    /// Ecosystem/niche classification.
    pub niche: NicheKey,
    /// Current lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// When the zooid entered its current lifecycle.
    pub entered_ts: DateTime<Utc>,
    /// When the zooid was last promoted to ACTIVE, if ever.
    pub promoted_ts: Option<DateTime<Utc>>,
    /// When the zooid last changed lifecycle state.
    pub last_transition_ts: DateTime<Utc>,
    /// When the zooid was retired, if RETIRED.
    pub retired_ts: Option<DateTime<Utc>>,
    /// Ordered list of ancestor names, oldest first.
    pub parent_lineage: Vec<String>,
    /// Synthetic fitness snapshot.
    pub phase: PhaseSnapshot,
    /// Production fitness snapshot.
    pub prod: ProdSnapshot,
    /// Count of ACTIVE->DORMANT quarantine demotions.
    pub demotions: u32,
    /// Count of PROBATION attempts (including the current one).
    pub probation_attempts: u32,
    /// Cooldown expiry; zooid is ineligible for the next PHASE batch until then.
    pub quarantine_until: Option<DateTime<Utc>>,
    /// Per-zooid policy overrides.
    pub policy: PolicyOverrides,
    /// HMAC over the canonical code+phenotype bytes, computed at creation.
    pub signature: String,
}

fn default_schema_version() -> String {
    CURRENT_SCHEMA_VERSION.to_string()
}

impl Zooid {
    /// Validate the monotonic-timestamp invariant:
    /// `entered_ts <= promoted_ts <= last_transition_ts` where present.
    pub fn check_monotonic_timestamps(&self) -> Result<()> {
        if let Some(promoted) = self.promoted_ts {
            if promoted < self.entered_ts {
                return Err(CoreError::IllegalTransition {
                    from: "entered_ts".into(),
                    to: "promoted_ts (earlier)".into(),
                });
            }
            if self.last_transition_ts < promoted {
                return Err(CoreError::IllegalTransition {
                    from: "promoted_ts".into(),
                    to: "last_transition_ts (earlier)".into(),
                });
            }
        } else if self.last_transition_ts < self.entered_ts {
            return Err(CoreError::IllegalTransition {
                from: "entered_ts".into(),
                to: "last_transition_ts (earlier)".into(),
            });
        }
        Ok(())
    }

    /// Whether this zooid is presently ineligible for PHASE selection due to
    /// an active quarantine cooldown.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        matches!(self.quarantine_until, Some(until) if until > now)
    }
}
