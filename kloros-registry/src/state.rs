//! In-memory registry state: the zooid table, per-niche state indexes, and
//! the global genome index.

use crate::error::{RegistryError, Result};
use kloros_core::{GenomeHash, LifecycleState, NicheKey, Zooid};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The four ordered state-sets tracked per niche ("Niche index").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NicheIndex {
    /// Names of ACTIVE zooids in this niche.
    pub active: BTreeSet<String>,
    /// Names of PROBATION zooids in this niche.
    pub probation: BTreeSet<String>,
    /// Names of DORMANT zooids in this niche.
    pub dormant: BTreeSet<String>,
    /// Names of RETIRED zooids in this niche.
    pub retired: BTreeSet<String>,
}

impl NicheIndex {
    fn set_for(&mut self, state: LifecycleState) -> &mut BTreeSet<String> {
        match state {
            LifecycleState::Active => &mut self.active,
            LifecycleState::Probation => &mut self.probation,
            LifecycleState::Dormant => &mut self.dormant,
            LifecycleState::Retired => &mut self.retired,
        }
    }

    fn remove_everywhere(&mut self, name: &str) {
        self.active.remove(name);
        self.probation.remove(name);
        self.dormant.remove(name);
        self.retired.remove(name);
    }
}

/// The full mutable state of one registry snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryState {
    /// Strictly increasing on every successful write.
    pub version: u64,
    /// All known zooids, keyed by name.
    pub zooids: BTreeMap<String, Zooid>,
    /// Per-niche state indexes, keyed by `NicheKey`.
    pub niches: BTreeMap<NicheKey, NicheIndex>,
    /// Global genome hash -> owning zooid name.
    pub genomes: BTreeMap<GenomeHash, String>,
}

impl RegistryState {
    /// Insert a brand-new zooid, wiring up its niche index and genome index
    /// entries. Callers are responsible for invoking this inside a
    /// `Registry::transaction` so invariants are re-checked before commit.
    pub fn insert_new(&mut self, zooid: Zooid) {
        let niche = zooid.niche.clone();
        let name = zooid.name.clone();
        let hash = zooid.genome_hash;
        let state = zooid.lifecycle_state;
        self.zooids.insert(name.clone(), zooid);
        self.niches
            .entry(niche)
            .or_default()
            .set_for(state)
            .insert(name.clone());
        self.genomes.insert(hash, name);
    }

    /// Move `name` from its current niche-index state-set to `to`, mutating
    /// the zooid's own `lifecycle_state` field to match. Callers apply the
    /// lifecycle gate (`kloros_lifecycle::transition::apply`) to the zooid
    /// first; this only keeps the niche index in sync with the result.
    pub fn reindex(&mut self, name: &str, to: LifecycleState) -> Result<()> {
        let zooid = self
            .zooids
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let niche = zooid.niche.clone();
        let index = self.niches.entry(niche).or_default();
        index.remove_everywhere(name);
        index.set_for(to).insert(name.to_string());
        Ok(())
    }

    /// Query: fetch one zooid by name.
    pub fn get(&self, name: &str) -> Option<&Zooid> {
        self.zooids.get(name)
    }

    /// Query: names in a given niche/state, in sorted order.
    pub fn list(&self, niche: &NicheKey, state: LifecycleState) -> Vec<String> {
        self.niches
            .get(niche)
            .map(|idx| match state {
                LifecycleState::Active => idx.active.iter().cloned().collect(),
                LifecycleState::Probation => idx.probation.iter().cloned().collect(),
                LifecycleState::Dormant => idx.dormant.iter().cloned().collect(),
                LifecycleState::Retired => idx.retired.iter().cloned().collect(),
            })
            .unwrap_or_default()
    }

    /// Query: the zooid owning a given genome hash, if any.
    pub fn find_by_genome(&self, hash: &GenomeHash) -> Option<&Zooid> {
        self.genomes.get(hash).and_then(|name| self.zooids.get(name))
    }

    /// Validate the registry invariants that span multiple objects
    /// (every name indexed under its own state, genome uniqueness).
    /// Version monotonicity and RETIRED terminality are enforced by the
    /// snapshot writer and the lifecycle transition table respectively,
    /// not here.
    pub fn check_invariants(&self) -> Result<()> {
        for (niche, index) in &self.niches {
            for (names, expected) in [
                (&index.active, LifecycleState::Active),
                (&index.probation, LifecycleState::Probation),
                (&index.dormant, LifecycleState::Dormant),
                (&index.retired, LifecycleState::Retired),
            ] {
                for name in names {
                    let zooid = self.zooids.get(name).ok_or_else(|| {
                        RegistryError::invariant(format!(
                            "niche index {niche} references unknown zooid {name}"
                        ))
                    })?;
                    if zooid.lifecycle_state != expected {
                        return Err(RegistryError::invariant(format!(
                            "{name} indexed as {expected} but lifecycle_state is {}",
                            zooid.lifecycle_state
                        )));
                    }
                    if zooid.niche != *niche {
                        return Err(RegistryError::invariant(format!(
                            "{name} indexed under niche {niche} but zooid.niche is {}",
                            zooid.niche
                        )));
                    }
                }
            }
        }

        for (name, zooid) in &self.zooids {
            let index = self.niches.get(&zooid.niche).ok_or_else(|| {
                RegistryError::invariant(format!(
                    "zooid {name} belongs to niche {} with no index entry",
                    zooid.niche
                ))
            })?;
            let memberships = [&index.active, &index.probation, &index.dormant, &index.retired]
                .iter()
                .filter(|set| set.contains(name))
                .count();
            if memberships != 1 {
                return Err(RegistryError::invariant(format!(
                    "zooid {name} appears in {memberships} state-sets of its niche, expected exactly 1"
                )));
            }

            let owner = self.genomes.get(&zooid.genome_hash).ok_or_else(|| {
                RegistryError::invariant(format!(
                    "genome {} for zooid {name} missing from genome index",
                    zooid.genome_hash
                ))
            })?;
            if owner != name {
                return Err(RegistryError::invariant(format!(
                    "genome {} maps to {owner}, expected {name}",
                    zooid.genome_hash
                )));
            }

            zooid
                .check_monotonic_timestamps()
                .map_err(|e| RegistryError::invariant(e.to_string()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kloros_core::{GenomeHash, PhaseSnapshot, PolicyOverrides, ProdSnapshot};

    fn zooid(name: &str, niche: NicheKey, state: LifecycleState) -> Zooid {
        let now = Utc::now();
        Zooid {
            schema_version: "1.0".into(),
            name: name.into(),
            genome_hash: GenomeHash::of(name.as_bytes(), b"pheno"),
            niche,
            lifecycle_state: state,
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
    fn fresh_state_passes_invariants() {
        let mut state = RegistryState::default();
        let niche = NicheKey::new("queue_management", "latency_monitoring");
        state.insert_new(zooid("lm_001", niche, LifecycleState::Dormant));
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn reindex_moves_between_state_sets() {
        let mut state = RegistryState::default();
        let niche = NicheKey::new("queue_management", "latency_monitoring");
        state.insert_new(zooid("lm_001", niche.clone(), LifecycleState::Dormant));
        state.zooids.get_mut("lm_001").unwrap().lifecycle_state = LifecycleState::Probation;
        state.reindex("lm_001", LifecycleState::Probation).unwrap();
        assert!(state.niches[&niche].probation.contains("lm_001"));
        assert!(!state.niches[&niche].dormant.contains("lm_001"));
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn detects_genome_index_drift() {
        let mut state = RegistryState::default();
        let niche = NicheKey::new("queue_management", "latency_monitoring");
        state.insert_new(zooid("lm_001", niche, LifecycleState::Dormant));
        state.genomes.insert(GenomeHash::of(b"other", b"pheno"), "lm_001".into());
        let hash = state.zooids["lm_001"].genome_hash;
        state.genomes.remove(&hash);
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn detects_double_membership() {
        let mut state = RegistryState::default();
        let niche = NicheKey::new("queue_management", "latency_monitoring");
        state.insert_new(zooid("lm_001", niche.clone(), LifecycleState::Dormant));
        state
            .niches
            .get_mut(&niche)
            .unwrap()
            .probation
            .insert("lm_001".into());
        assert!(state.check_invariants().is_err());
    }
}
