//! Configuration schema for the three operator-facing files:
//! `lifecycle_policy.toml`, `workload_profiles.toml`, and `keys.toml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level `lifecycle_policy.toml` shape: global defaults, per-niche
/// overrides, and named schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecyclePolicyConfig {
    /// Defaults applied to every niche unless overridden.
    #[serde(default)]
    pub defaults: PolicyDefaults,
    /// Per-niche overrides, keyed by `"ecosystem/niche"`.
    #[serde(default)]
    pub niches: BTreeMap<String, PolicyDefaults>,
    /// Named schedules driving the scheduler's emission cadence.
    #[serde(default)]
    pub schedules: BTreeMap<String, ScheduleEntry>,
}

impl Default for LifecyclePolicyConfig {
    fn default() -> Self {
        Self {
            defaults: PolicyDefaults::default(),
            niches: BTreeMap::new(),
            schedules: BTreeMap::new(),
        }
    }
}

impl LifecyclePolicyConfig {
    /// Resolve the effective policy for `"ecosystem/niche"`, falling back to
    /// `defaults` when no override is registered.
    pub fn resolve(&self, niche_key: &str) -> PolicyDefaults {
        self.niches.get(niche_key).cloned().unwrap_or_else(|| self.defaults.clone())
    }
}

/// Gate thresholds and timing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDefaults {
    /// Minimum decay-weighted mean fitness required to graduate PROBATION->ACTIVE.
    #[serde(default = "default_phase_threshold")]
    pub phase_threshold: f64,
    /// Minimum decay-weighted evidence count required to graduate.
    #[serde(default = "default_min_phase_evidence")]
    pub min_phase_evidence: u32,
    /// Number of ACTIVE->DORMANT demotions after which a zooid is RETIRED.
    #[serde(default = "default_demotion_ceiling")]
    pub demotion_ceiling: u32,
    /// Rolling window, in seconds, over which production failures are counted.
    #[serde(default = "default_quarantine_window_sec")]
    pub quarantine_window_sec: u64,
    /// Half-life, in seconds, of the PHASE fitness decay weighting.
    #[serde(default = "default_phase_half_life_sec")]
    pub phase_half_life_sec: u64,
    /// Seconds to wait for a post-promotion heartbeat before rolling back.
    #[serde(default = "default_heartbeat_slo_sec")]
    pub heartbeat_slo_sec: u64,
    /// Production failures inside `quarantine_window_sec` that trip quarantine.
    #[serde(default = "default_prod_guard_failures_threshold")]
    pub prod_guard_failures_threshold: u32,
    /// Top-`k` winners retained per tournament round.
    #[serde(default = "default_tournament_k")]
    pub tournament_k: u32,
    /// Crashes within one PHASE batch that mark a candidate catastrophic.
    #[serde(default = "default_catastrophic_crash_limit")]
    pub catastrophic_crash_limit: u32,
}

fn default_phase_threshold() -> f64 {
    0.70
}
fn default_min_phase_evidence() -> u32 {
    50
}
fn default_demotion_ceiling() -> u32 {
    2
}
fn default_quarantine_window_sec() -> u64 {
    900
}
fn default_phase_half_life_sec() -> u64 {
    12 * 3600
}
fn default_heartbeat_slo_sec() -> u64 {
    30
}
fn default_prod_guard_failures_threshold() -> u32 {
    3
}
fn default_tournament_k() -> u32 {
    2
}
fn default_catastrophic_crash_limit() -> u32 {
    3
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            phase_threshold: default_phase_threshold(),
            min_phase_evidence: default_min_phase_evidence(),
            demotion_ceiling: default_demotion_ceiling(),
            quarantine_window_sec: default_quarantine_window_sec(),
            phase_half_life_sec: default_phase_half_life_sec(),
            heartbeat_slo_sec: default_heartbeat_slo_sec(),
            prod_guard_failures_threshold: default_prod_guard_failures_threshold(),
            tournament_k: default_tournament_k(),
            catastrophic_crash_limit: default_catastrophic_crash_limit(),
        }
    }
}

/// One entry in the scheduler's named-schedule table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Base tick interval in seconds, before adaptive multipliers.
    pub interval_sec: u64,
    /// Bus topic emitted on each tick.
    pub signal: String,
    /// Ecosystem this schedule drives, or `"*"` for all.
    #[serde(default = "default_ecosystem_wildcard")]
    pub ecosystem: String,
    /// Whether fatigue/wellbeing multipliers apply to this schedule.
    #[serde(default)]
    pub adaptive: bool,
    /// Whether this schedule is critical-priority (never slowed past the floor).
    #[serde(default)]
    pub critical: bool,
    /// Minimum interval in seconds this schedule may be slowed to, regardless
    /// of fatigue multiplier. Only enforced when `critical` is set.
    #[serde(default = "default_floor_sec")]
    pub floor_sec: u64,
}

fn default_ecosystem_wildcard() -> String {
    "*".to_string()
}
fn default_floor_sec() -> u64 {
    1
}

/// Top-level `workload_profiles.toml` shape: per-niche PHASE workload drivers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkloadProfilesConfig {
    /// Workload driver profiles, keyed by `"ecosystem/niche"`.
    #[serde(default)]
    pub profiles: BTreeMap<String, WorkloadProfile>,
}

/// How to sandbox-execute the synthetic workload for one niche.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadProfile {
    /// Executable invoked as the workload driver child process.
    pub driver_command: String,
    /// Arguments passed to the driver.
    #[serde(default)]
    pub driver_args: Vec<String>,
    /// Hard deadline, in seconds, for one synthetic run.
    #[serde(default = "default_driver_timeout_sec")]
    pub timeout_sec: u64,
    /// Name of a registered catastrophic-failure predicate for this niche.
    /// Left unset to emit `governance.catastrophic_rule_missing` instead.
    #[serde(default)]
    pub catastrophic_rule: Option<String>,
    /// Sandboxed runs to drive per candidate per batch, one `phase_fitness`
    /// row each. Independent of `catastrophic_crash_limit`, which bounds how
    /// many of those runs may crash before the candidate is retired.
    #[serde(default = "default_observations_per_batch")]
    pub observations_per_batch: u32,
}

fn default_driver_timeout_sec() -> u64 {
    60
}

fn default_observations_per_batch() -> u32 {
    50
}

/// Top-level `keys.toml` shape: the HMAC signing key ring.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeyRingConfig {
    /// Identifier of the key current writers should sign with.
    pub active_key_id: String,
    /// All keys readers should accept, active and retired.
    #[serde(default)]
    pub keys: Vec<HmacKeyEntry>,
    /// Retired keys beyond this count are rejected at validation time.
    #[serde(default = "default_retain_last")]
    pub retain_last: usize,
}

fn default_retain_last() -> usize {
    2
}

/// One HMAC key in the ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmacKeyEntry {
    /// Opaque key identifier, stamped into signed records' key id field.
    pub id: String,
    /// Hex-encoded secret bytes.
    pub secret_hex: String,
    /// RFC3339 creation timestamp, for rotation bookkeeping.
    pub created_ts: String,
}
