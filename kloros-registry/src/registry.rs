//! The `Registry`: authoritative zooid/niche/genome state with atomic,
//! crash-safe transitions.

use crate::error::{RegistryError, Result};
use crate::lock::LockGuard;
use crate::snapshot::{load_canonical, prune_old_versions, write_snapshot};
use crate::state::{NicheIndex, RegistryState};
use chrono::Utc;
use kloros_bus::{ChemBus, Facts};
use kloros_core::{GenomeHash, LifecycleState, NicheKey, Zooid};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

/// Snapshot versions older than this, relative to the current version, are
/// pruned after each successful write ("retained for a
/// configurable rolling window").
pub const DEFAULT_SNAPSHOT_RETENTION: u64 = 100;

/// What changed while reconciling a freshly loaded snapshot against its own
/// niche indexes and genome index ("Reconciliation on load").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Niche-index entries rebuilt from the zooid table.
    pub index_fixes: u32,
    /// Duplicate-genome zooids retired (all but the earliest `entered_ts`).
    pub genomes_retired: u32,
}

impl ReconciliationReport {
    fn is_empty(&self) -> bool {
        self.index_fixes == 0 && self.genomes_retired == 0
    }
}

/// The authoritative on-disk registry, guarded by a single-writer file lock
/// for the duration of each `transaction`.
pub struct Registry {
    dir: PathBuf,
    lock_path: PathBuf,
    snapshot_retention: u64,
    state: RwLock<RegistryState>,
    bus: Option<Arc<ChemBus>>,
}

impl Registry {
    /// Load the canonical snapshot from `state_root/registry/`, reconciling
    /// any drift, and construct a `Registry` ready to serve queries and
    /// transactions. The global coordination lock lives at
    /// `state_root/locks/colony_cycle.lock`. `bus`, if given, receives
    /// `governance.registry_reconciled` events as they occur.
    #[instrument(skip(bus), fields(state_root = %state_root.as_ref().display()))]
    pub async fn load(state_root: impl AsRef<Path>, bus: Option<Arc<ChemBus>>) -> Result<Self> {
        let state_root = state_root.as_ref();
        let dir = state_root.join("registry");
        let lock_path = state_root.join("locks").join("colony_cycle.lock");
        let mut state = load_canonical(&dir)?;
        let report = reconcile(&mut state);

        if !report.is_empty() {
            warn!(
                index_fixes = report.index_fixes,
                genomes_retired = report.genomes_retired,
                "registry reconciled drift on load"
            );
            state.version += 1;
            write_snapshot(&dir, &state)?;
            if let Some(bus) = &bus {
                let mut facts = Facts::new();
                facts.insert("index_fixes".into(), Value::from(report.index_fixes));
                facts.insert("genomes_retired".into(), Value::from(report.genomes_retired));
                let _ = bus
                    .emit("governance.registry_reconciled", "", 1.0, facts, "registry")
                    .await;
            }
        }

        Ok(Self {
            dir,
            lock_path,
            snapshot_retention: DEFAULT_SNAPSHOT_RETENTION,
            state: RwLock::new(state),
            bus,
        })
    }

    /// Fetch one zooid by name.
    pub async fn get(&self, name: &str) -> Option<Zooid> {
        self.state.read().await.get(name).cloned()
    }

    /// List zooid names in a given niche/state, in sorted order.
    pub async fn list(&self, niche: &NicheKey, state: LifecycleState) -> Vec<String> {
        self.state.read().await.list(niche, state)
    }

    /// Find the zooid owning a genome hash, if any.
    pub async fn find_by_genome(&self, hash: &GenomeHash) -> Option<Zooid> {
        self.state.read().await.find_by_genome(hash).cloned()
    }

    /// Current registry version, for callers that need to observe the
    /// snapshot sequence directly.
    pub async fn version(&self) -> u64 {
        self.state.read().await.version
    }

    /// The bus handle this registry was constructed with, if any.
    pub fn bus(&self) -> Option<&Arc<ChemBus>> {
        self.bus.as_ref()
    }

    /// Run `f` against a mutable copy of the state; on success, validate
    /// invariants, bump the version, and atomically persist the result. On
    /// any failure (from `f` or from invariant validation) nothing is
    /// written and the in-memory state is untouched.
    #[instrument(skip(self, f))]
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut RegistryState) -> Result<T>,
    {
        let _guard = LockGuard::acquire_blocking(&self.lock_path)?;
        let mut guard = self.state.write().await;
        let mut candidate = guard.clone();
        let output = f(&mut candidate)?;

        candidate
            .check_invariants()
            .map_err(|e| RegistryError::invariant(e.to_string()))?;

        candidate.version = guard.version + 1;
        write_snapshot(&self.dir, &candidate)?;
        prune_old_versions(&self.dir, candidate.version, self.snapshot_retention)?;

        info!(version = candidate.version, "registry transaction committed");
        *guard = candidate;
        Ok(output)
    }
}

/// Rebuild niche indexes from the zooid table and retire all but the
/// earliest-`entered_ts` zooid for any duplicated genome hash (/// "Reconciliation on load").
fn reconcile(state: &mut RegistryState) -> ReconciliationReport {
    let mut report = ReconciliationReport::default();

    let mut rebuilt: std::collections::BTreeMap<NicheKey, NicheIndex> = Default::default();
    for zooid in state.zooids.values() {
        let idx = rebuilt.entry(zooid.niche.clone()).or_default();
        let set = match zooid.lifecycle_state {
            LifecycleState::Active => &mut idx.active,
            LifecycleState::Probation => &mut idx.probation,
            LifecycleState::Dormant => &mut idx.dormant,
            LifecycleState::Retired => &mut idx.retired,
        };
        set.insert(zooid.name.clone());
    }
    if rebuilt != state.niches {
        report.index_fixes = 1;
        state.niches = rebuilt;
    }

    let mut by_genome: std::collections::BTreeMap<GenomeHash, Vec<String>> = Default::default();
    for zooid in state.zooids.values() {
        by_genome.entry(zooid.genome_hash).or_default().push(zooid.name.clone());
    }
    for (_hash, mut owners) in by_genome {
        if owners.len() <= 1 {
            continue;
        }
        owners.sort_by_key(|name| state.zooids[name].entered_ts);
        for name in owners.into_iter().skip(1) {
            if let Some(z) = state.zooids.get_mut(&name) {
                if z.lifecycle_state != LifecycleState::Retired {
                    let niche = z.niche.clone();
                    z.lifecycle_state = LifecycleState::Retired;
                    z.retired_ts = Some(Utc::now());
                    z.last_transition_ts = Utc::now();
                    let idx = state.niches.entry(niche).or_default();
                    idx.dormant.remove(&name);
                    idx.probation.remove(&name);
                    idx.active.remove(&name);
                    idx.retired.insert(name);
                    report.genomes_retired += 1;
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use kloros_core::{PhaseSnapshot, PolicyOverrides, ProdSnapshot};

    fn zooid(name: &str, niche: NicheKey, entered_ts: chrono::DateTime<Utc>, hash: GenomeHash) -> Zooid {
        Zooid {
            schema_version: "1.0".into(),
            name: name.into(),
            genome_hash: hash,
            niche,
            lifecycle_state: LifecycleState::Dormant,
            entered_ts,
            promoted_ts: None,
            last_transition_ts: entered_ts,
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

    #[tokio::test]
    async fn load_reconciles_duplicate_genome() {
        let dir = tempfile::tempdir().unwrap();
        let niche = NicheKey::new("queue_management", "latency_monitoring");
        let hash = GenomeHash::of(b"same", b"pheno");
        let now = Utc::now();

        let mut state = RegistryState::default();
        state.insert_new(zooid("older", niche.clone(), now - chrono::Duration::seconds(10), hash));
        // Force a duplicate genome in a second, independently-inserted zooid.
        let mut dup = zooid("newer", niche, now, hash);
        dup.name = "newer".into();
        state.zooids.insert("newer".into(), dup.clone());
        state
            .niches
            .get_mut(&dup.niche)
            .unwrap()
            .dormant
            .insert("newer".into());
        state.genomes.insert(hash, "older".into());
        state.version = 1;
        write_snapshot(dir.path(), &state).unwrap();

        let registry = Registry::load(dir.path(), None).await.unwrap();
        let older = registry.get("older").await.unwrap();
        let newer = registry.get("newer").await.unwrap();
        assert_eq!(older.lifecycle_state, LifecycleState::Dormant);
        assert_eq!(newer.lifecycle_state, LifecycleState::Retired);
    }

    #[tokio::test]
    async fn transaction_persists_and_bumps_version() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(dir.path(), None).await.unwrap();
        let niche = NicheKey::new("queue_management", "latency_monitoring");
        let hash = GenomeHash::of(b"g1", b"pheno");

        registry
            .transaction(|state| {
                state.insert_new(zooid("lm_001", niche.clone(), Utc::now(), hash));
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(registry.version().await, 1);
        assert!(registry.get("lm_001").await.is_some());

        let reloaded = Registry::load(dir.path(), None).await.unwrap();
        assert_eq!(reloaded.version().await, 1);
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_invariant_violation() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(dir.path(), None).await.unwrap();

        let result: Result<()> = registry
            .transaction(|state| {
                state.niches.entry(NicheKey::new("e", "n")).or_default().active.insert("ghost".into());
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(registry.version().await, 0);
    }
}
