//! The Bioreactor: per-tick candidate differentiation, de-duplication,
//! registration, and conservative ACTIVE tournament.

use crate::error::Result;
use crate::loss_tracker::LossTracker;
use crate::phenotype::{canonical_phenotype_bytes, genome_hash_of, mutate, NicheMutationSpec, Phenotype};
use crate::phenotype_store::PhenotypeStore;
use crate::tournament::{rank, split_winners};
use chrono::Utc;
use kloros_bus::{ChemBus, Facts};
use kloros_core::{LifecycleState, NicheKey, PhaseQueueRecord, PhaseSnapshot, PolicyOverrides, ProdSnapshot, Zooid};
use kloros_ledger::{hmac_sign::KeyRing, LedgerStore, LifecycleEventLog};
use kloros_lifecycle::Reason;
use kloros_registry::Registry;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};

/// What one `run_tick` call did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Names of newly registered DORMANT candidates.
    pub registered: Vec<String>,
    /// Candidates discarded because their genome hash already exists.
    pub duplicates_discarded: usize,
    /// Tournament winners this tick (empty if niche had no ACTIVE defenders).
    pub winners: Vec<String>,
    /// At most one zooid retired this tick for the conservatism rule.
    pub retired: Option<String>,
}

/// Orchestrates one niche's differentiate/de-duplicate/register/tournament
/// cycle. Registered as its own instance per niche, or driven by a single
/// caller iterating every configured niche.
pub struct Bioreactor {
    registry: Arc<Registry>,
    phase_queue: Arc<LedgerStore<PhaseQueueRecord>>,
    losses: LossTracker,
    phenotypes: PhenotypeStore,
    keyring: KeyRing,
    bus: Option<Arc<ChemBus>>,
    lifecycle_log: Option<Arc<LifecycleEventLog>>,
}

impl Bioreactor {
    /// Construct a Bioreactor over a shared registry, `phase_queue` ledger
    /// stream, its own loss/phenotype bookkeeping stores, and the signing
    /// key ring used to stamp each new zooid's `signature` at creation.
    /// `lifecycle_log`, if given, records the tournament's at-most-one
    /// retirement per tick to `lifecycle_events` and the bus.
    pub fn new(
        registry: Arc<Registry>,
        phase_queue: Arc<LedgerStore<PhaseQueueRecord>>,
        losses: LossTracker,
        phenotypes: PhenotypeStore,
        keyring: KeyRing,
        bus: Option<Arc<ChemBus>>,
        lifecycle_log: Option<Arc<LifecycleEventLog>>,
    ) -> Self {
        Self {
            registry,
            phase_queue,
            losses,
            phenotypes,
            keyring,
            bus,
            lifecycle_log,
        }
    }

    /// Run one full tick for `niche`: differentiate `candidate_count`
    /// mutants, register the surviving (non-duplicate) ones as DORMANT and
    /// enqueue them to `phase_queue`, then run the ACTIVE tournament
    /// (steps 1-5, all in one registry transaction per step).
    #[instrument(skip(self, spec, rng), fields(niche = %niche))]
    pub async fn run_tick(
        &self,
        niche: &NicheKey,
        spec: &NicheMutationSpec,
        candidate_count: usize,
        tournament_k: u32,
        retire_after_losses: u32,
        min_active: usize,
        rng: &mut impl Rng,
    ) -> Result<TickReport> {
        let mut report = TickReport::default();

        let defenders = self.registry.list(niche, LifecycleState::Active).await;
        let base_phenotypes = self.phenotypes.get_many(&defenders)?;

        let mut fresh: Vec<(String, Phenotype, String)> = Vec::new();
        for _ in 0..candidate_count {
            let base = if base_phenotypes.is_empty() {
                Phenotype::new()
            } else {
                base_phenotypes[rng.gen_range(0..base_phenotypes.len())].clone()
            };
            let mutated = mutate(&base, spec, rng);
            let hash = genome_hash_of(&spec.module_source, &mutated)?;

            if self.registry.find_by_genome(&hash).await.is_some() {
                report.duplicates_discarded += 1;
                continue;
            }
            let name = format!("{}_{:012x}", niche.niche, u128::from_be_bytes(hash.0[..16].try_into().unwrap()));
            let mut genome_bytes = spec.module_source.clone();
            genome_bytes.push(0);
            genome_bytes.extend(canonical_phenotype_bytes(&mutated)?);
            let signature = self.keyring.sign(&genome_bytes).unwrap_or_default();
            fresh.push((name, mutated, signature));
        }

        if !fresh.is_empty() {
            let now = Utc::now();
            let niche_owned = niche.clone();
            let candidates = fresh.clone();
            let spec_module_source = spec.module_source.clone();
            self.registry
                .transaction(move |state| {
                    for (name, phenotype, signature) in &candidates {
                        let hash = genome_hash_of(&spec_module_source, phenotype)
                            .map_err(|e| kloros_registry::RegistryError::invariant(e.to_string()))?;
                        state.insert_new(Zooid {
                            schema_version: kloros_core::CURRENT_SCHEMA_VERSION.to_string(),
                            name: name.clone(),
                            genome_hash: hash,
                            niche: niche_owned.clone(),
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
                            signature: signature.clone(),
                        });
                    }
                    Ok(())
                })
                .await?;

            for (name, phenotype, _signature) in &fresh {
                self.phenotypes.put(name, phenotype)?;
                self.phase_queue.append(
                    now.timestamp_millis(),
                    &PhaseQueueRecord {
                        ts: now,
                        zooid: name.clone(),
                        batch_id: None,
                    },
                )?;
            }
            report.registered = fresh.into_iter().map(|(name, _, _)| name).collect();

            if let Some(bus) = &self.bus {
                let mut facts = Facts::new();
                facts.insert("niche".into(), Value::String(niche.to_string()));
                facts.insert("registered".into(), Value::from(report.registered.len() as u64));
                let _ = bus
                    .emit("governance.bioreactor_tick", &niche.ecosystem, 1.0, facts, "bioreactor")
                    .await;
            }
        }

        if defenders.is_empty() {
            return Ok(report);
        }

        let mut defender_zooids = Vec::with_capacity(defenders.len());
        for name in &defenders {
            if let Some(z) = self.registry.get(name).await {
                defender_zooids.push(z);
            }
        }

        let ranked = rank(&defender_zooids);
        let (winners, losers) = split_winners(&ranked, tournament_k);
        for winner in &winners {
            self.losses.reset(winner)?;
        }

        let mut retire_candidate: Option<(String, u32)> = None;
        for loser in &losers {
            let streak = self.losses.record_loss(loser)?;
            if streak >= retire_after_losses {
                match &retire_candidate {
                    Some((_, best)) if *best >= streak => {}
                    _ => retire_candidate = Some((loser.clone(), streak)),
                }
            }
        }

        report.winners = winners;

        if let Some((name, _)) = retire_candidate {
            if defenders.len().saturating_sub(1) >= min_active {
                let name_owned = name.clone();
                let (from, retired_zooid) = self
                    .registry
                    .transaction(move |state| {
                        let zooid = state
                            .zooids
                            .get_mut(&name_owned)
                            .ok_or_else(|| kloros_registry::RegistryError::NotFound(name_owned.clone()))?;
                        let from = zooid.lifecycle_state;
                        let req = kloros_lifecycle::tournament_retire(zooid, Utc::now())?;
                        kloros_lifecycle::apply(zooid, req)?;
                        state.reindex(&name_owned, LifecycleState::Retired)?;
                        Ok((from, zooid.clone()))
                    })
                    .await?;
                self.losses.reset(&name)?;
                if let Some(log) = &self.lifecycle_log {
                    let _ = log
                        .record(&retired_zooid, from, Reason::TournamentLossRetired, None)
                        .await;
                }
                info!(zooid = %name, "tournament conservatism rule retired a repeat loser");
                report.retired = Some(name);
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    fn spec() -> NicheMutationSpec {
        let mut ranges = BTreeMap::new();
        ranges.insert("threshold".into(), crate::phenotype::MutationRange { min: 0.0, max: 1.0 });
        NicheMutationSpec {
            module_source: b"latency_monitor_v1".to_vec(),
            ranges,
        }
    }

    async fn harness() -> (Bioreactor, Arc<Registry>, NicheKey) {
        let registry_dir = tempfile::tempdir().unwrap();
        let ledger_dir = tempfile::tempdir().unwrap();
        let bookkeeping_dir = tempfile::tempdir().unwrap();

        let registry = Arc::new(Registry::load(registry_dir.path(), None).await.unwrap());
        let phase_queue = Arc::new(LedgerStore::open(ledger_dir.path(), "phase_queue").unwrap());
        let losses = LossTracker::open(bookkeeping_dir.path()).unwrap();
        let phenotypes = PhenotypeStore::open(bookkeeping_dir.path()).unwrap();
        let keyring = KeyRing::single("k1", vec![9, 8, 7, 6]);
        let niche = NicheKey::new("queue_management", "latency_monitoring");

        let bioreactor =
            Bioreactor::new(registry.clone(), phase_queue, losses, phenotypes, keyring, None, None);
        (bioreactor, registry, niche)
    }

    #[tokio::test]
    async fn run_tick_registers_dormant_candidates() {
        let (bioreactor, registry, niche) = harness().await;
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);

        let report = bioreactor
            .run_tick(&niche, &spec(), 3, 2, 3, 1, &mut rng)
            .await
            .unwrap();

        assert_eq!(report.registered.len(), 3);
        for name in &report.registered {
            let zooid = registry.get(name).await.unwrap();
            assert_eq!(zooid.lifecycle_state, LifecycleState::Dormant);
            assert!(!zooid.signature.is_empty());
        }
    }

    #[tokio::test]
    async fn run_tick_discards_duplicate_genomes() {
        let (bioreactor, _registry, niche) = harness().await;
        let mut rng_a = rand::rngs::StdRng::seed_from_u64(42);
        let mut rng_b = rand::rngs::StdRng::seed_from_u64(42);

        let first = bioreactor.run_tick(&niche, &spec(), 2, 2, 3, 1, &mut rng_a).await.unwrap();
        let second = bioreactor.run_tick(&niche, &spec(), 2, 2, 3, 1, &mut rng_b).await.unwrap();

        assert_eq!(first.registered.len(), 2);
        assert_eq!(second.registered.len(), 0);
        assert_eq!(second.duplicates_discarded, 2);
    }

    #[tokio::test]
    async fn conservatism_rule_retires_at_most_one_repeat_loser() {
        let (bioreactor, registry, niche) = harness().await;
        let now = Utc::now();

        for (name, ok_rate) in [("lm_a", 0.9), ("lm_b", 0.8), ("lm_c", 0.1)] {
            registry
                .transaction({
                    let name = name.to_string();
                    let niche = niche.clone();
                    move |state| {
                        state.insert_new(Zooid {
                            schema_version: "1.0".into(),
                            name: name.clone(),
                            genome_hash: kloros_core::GenomeHash::of(name.as_bytes(), b"p"),
                            niche,
                            lifecycle_state: LifecycleState::Active,
                            entered_ts: now,
                            promoted_ts: Some(now),
                            last_transition_ts: now,
                            retired_ts: None,
                            parent_lineage: vec![],
                            phase: PhaseSnapshot::default(),
                            prod: ProdSnapshot {
                                ok_rate,
                                ..ProdSnapshot::default()
                            },
                            demotions: 0,
                            probation_attempts: 0,
                            quarantine_until: None,
                            policy: PolicyOverrides::default(),
                            signature: "sig".into(),
                        });
                        Ok(())
                    }
                })
                .await
                .unwrap();
        }

        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        for _ in 0..2 {
            let report = bioreactor.run_tick(&niche, &spec(), 0, 2, 3, 1, &mut rng).await.unwrap();
            assert_eq!(report.retired, None);
        }
        let report = bioreactor.run_tick(&niche, &spec(), 0, 2, 3, 1, &mut rng).await.unwrap();

        assert_eq!(report.retired, Some("lm_c".to_string()));
        let retired = registry.get("lm_c").await.unwrap();
        assert_eq!(retired.lifecycle_state, LifecycleState::Retired);
    }

    #[tokio::test]
    async fn min_active_floor_blocks_retirement() {
        let (bioreactor, registry, niche) = harness().await;
        let now = Utc::now();

        for (name, ok_rate) in [("lm_a", 0.9), ("lm_b", 0.1)] {
            registry
                .transaction({
                    let name = name.to_string();
                    let niche = niche.clone();
                    move |state| {
                        state.insert_new(Zooid {
                            schema_version: "1.0".into(),
                            name: name.clone(),
                            genome_hash: kloros_core::GenomeHash::of(name.as_bytes(), b"p"),
                            niche,
                            lifecycle_state: LifecycleState::Active,
                            entered_ts: now,
                            promoted_ts: Some(now),
                            last_transition_ts: now,
                            retired_ts: None,
                            parent_lineage: vec![],
                            phase: PhaseSnapshot::default(),
                            prod: ProdSnapshot {
                                ok_rate,
                                ..ProdSnapshot::default()
                            },
                            demotions: 0,
                            probation_attempts: 0,
                            quarantine_until: None,
                            policy: PolicyOverrides::default(),
                            signature: "sig".into(),
                        });
                        Ok(())
                    }
                })
                .await
                .unwrap();
        }

        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        for _ in 0..5 {
            let report = bioreactor.run_tick(&niche, &spec(), 0, 1, 3, 2, &mut rng).await.unwrap();
            assert_eq!(report.retired, None);
        }
        let lm_b = registry.get("lm_b").await.unwrap();
        assert_eq!(lm_b.lifecycle_state, LifecycleState::Active);
    }
}
