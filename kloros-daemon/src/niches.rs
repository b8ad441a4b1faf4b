//! Niche topology: which ecosystem/niche pairs the Bioreactor and PHASE
//! Evaluator drive, and the Bioreactor's per-niche mutation bounds.
//!
//! The three lifecycle-gating configuration artifacts (`lifecycle_policy`,
//! `workload_profiles`, `keys`) don't carry the niche-to-module mapping the
//! Bioreactor needs to *generate* candidates in the first place (its
//! niche-specific mutation operators need a concrete starting input).
//! This is that missing fourth artifact, `niches.toml`, loaded directly by
//! `kloros-daemon` rather than folded into `kloros-config` since it shapes
//! wiring (which binaries run for which niches), not lifecycle gating.

use kloros_bioreactor::{MutationRange, NicheMutationSpec};
use kloros_core::NicheKey;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{DaemonError, Result};

/// One configured niche: its topology plus the Bioreactor tuning knobs that
/// are not gate thresholds (those live in `lifecycle_policy.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct NicheEntry {
    pub ecosystem: String,
    pub niche: String,
    /// Inline module source identifying this niche's candidate logic,
    /// content-hashed alongside each candidate's phenotype.
    pub module_source: String,
    /// Per-parameter bounded resampling ranges, `param -> [min, max]`.
    #[serde(default)]
    pub ranges: BTreeMap<String, [f64; 2]>,
    /// Candidates differentiated per Bioreactor tick.
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,
    /// Consecutive tournament losses before the conservatism rule considers
    /// retiring a defender.
    #[serde(default = "default_retire_after_losses")]
    pub retire_after_losses: u32,
    /// Floor on ACTIVE population the tournament will never drop below.
    #[serde(default = "default_min_active")]
    pub min_active: usize,
    /// Upper bound on PROBATION candidates pulled into one PHASE batch.
    #[serde(default = "default_max_phase_candidates")]
    pub max_phase_candidates: usize,
    /// Command template used to start this niche's zooid processes, e.g.
    /// `["/opt/zooids/lm_runner"]`; the zooid name is appended as the final
    /// argument. Empty means this niche's zooids are started by some other
    /// external mechanism and the core only watches their heartbeats, since
    /// service lifecycle is otherwise managed by the supervisor.
    #[serde(default)]
    pub service_command: Vec<String>,
}

fn default_candidate_count() -> usize {
    4
}
fn default_retire_after_losses() -> u32 {
    3
}
fn default_min_active() -> usize {
    1
}
fn default_max_phase_candidates() -> usize {
    20
}

impl NicheEntry {
    /// This entry's ecosystem/niche key.
    pub fn key(&self) -> NicheKey {
        NicheKey::new(self.ecosystem.clone(), self.niche.clone())
    }

    /// The Bioreactor mutation spec this entry describes.
    pub fn mutation_spec(&self) -> NicheMutationSpec {
        NicheMutationSpec {
            module_source: self.module_source.clone().into_bytes(),
            ranges: self
                .ranges
                .iter()
                .map(|(param, [min, max])| (param.clone(), MutationRange { min: *min, max: *max }))
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct NichesFile {
    #[serde(default)]
    niche: Vec<NicheEntry>,
}

/// Load `niches.toml` from `config_dir`. Absent is valid (an empty
/// topology; every per-niche binary simply has nothing to iterate).
pub fn load_niches(config_dir: impl AsRef<Path>) -> Result<Vec<NicheEntry>> {
    let path = config_dir.as_ref().join("niches.toml");
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path).map_err(|source| DaemonError::StateDir {
        path: path.display().to_string(),
        source,
    })?;
    let parsed: NichesFile = toml::from_str(&content)
        .map_err(|e| DaemonError::Config(kloros_config::ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        }))?;
    Ok(parsed.niche)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_file_yields_empty_topology() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_niches(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn parses_one_niche_entry() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("niches.toml"),
            r#"
[[niche]]
ecosystem = "queue_management"
niche = "latency_monitoring"
module_source = "lm_v1"
candidate_count = 6

[niche.ranges]
threshold_ms = [10.0, 500.0]
"#,
        )
        .unwrap();
        let niches = load_niches(dir.path()).unwrap();
        assert_eq!(niches.len(), 1);
        assert_eq!(niches[0].key().to_string(), "queue_management/latency_monitoring");
        assert_eq!(niches[0].candidate_count, 6);
        assert_eq!(niches[0].mutation_spec().ranges.len(), 1);
    }
}
