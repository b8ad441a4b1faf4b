//! The Graduator: aggregates one PROBATION candidate's `phase_fitness`
//! history into its `phase` snapshot, applies the graduation gate, and
//! rolls back a promoted zooid that never heartbeats within its SLO.
//! Driven entirely off the bus: subscribes match-all and
//! dispatches on signal name, since its three inputs
//! (`governance.phase_batch_closed`, `HEARTBEAT`, `Q_SCHEDULE_TICK`) share
//! no common topic prefix.

use crate::aggregate::decay_weighted;
use crate::error::{GraduatorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kloros_bus::{signals, ChemBus, Envelope, Facts, SignalHandler};
use kloros_config::LifecyclePolicyConfig;
use kloros_core::{LifecycleState, PhaseFitnessRecord, ProdGuardFailureLookup};
use kloros_ledger::{LedgerStore, LifecycleEventLog};
use kloros_lifecycle::{GraduationVerdict, Reason, ServiceAction};
use kloros_registry::Registry;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

pub struct Graduator {
    registry: Arc<Registry>,
    phase_fitness: Arc<LedgerStore<PhaseFitnessRecord>>,
    lifecycle_log: Arc<LifecycleEventLog>,
    bus: Arc<ChemBus>,
    policy: Arc<LifecyclePolicyConfig>,
    prod_guard: Option<Arc<dyn ProdGuardFailureLookup>>,
    /// Promoted zooids awaiting their first post-promotion heartbeat, keyed
    /// by name, mapped to the deadline after which a missing heartbeat
    /// triggers rollback.
    pending_heartbeats: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Graduator {
    /// Construct a Graduator. `prod_guard`, when given, is consulted by the
    /// graduation gate; leaving it `None` (before the Quarantine Monitor is
    /// wired in) means every candidate is judged as having a clean record.
    pub fn new(
        registry: Arc<Registry>,
        phase_fitness: Arc<LedgerStore<PhaseFitnessRecord>>,
        lifecycle_log: Arc<LifecycleEventLog>,
        bus: Arc<ChemBus>,
        policy: Arc<LifecyclePolicyConfig>,
        prod_guard: Option<Arc<dyn ProdGuardFailureLookup>>,
    ) -> Self {
        Self {
            registry,
            phase_fitness,
            lifecycle_log,
            bus,
            policy,
            prod_guard,
            pending_heartbeats: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate every candidate named in a `governance.phase_batch_closed`
    /// envelope.
    #[instrument(skip(self, envelope))]
    pub async fn handle_batch_closed(&self, envelope: &Envelope) -> Result<()> {
        let candidates = envelope
            .facts
            .get("candidates")
            .and_then(Value::as_array)
            .ok_or(GraduatorError::MissingFact("candidates"))?;

        for candidate in candidates {
            let Some(name) = candidate.as_str() else { continue };
            if let Err(e) = self.evaluate_candidate(name, Utc::now()).await {
                warn!(zooid = name, error = %e, "graduation gate evaluation failed");
            }
        }
        Ok(())
    }

    async fn evaluate_candidate(&self, name: &str, now: DateTime<Utc>) -> Result<()> {
        let Some(zooid) = self.registry.get(name).await else {
            return Ok(());
        };
        let policy = self.policy.resolve(&zooid.niche.to_string());
        let history: Vec<PhaseFitnessRecord> = self
            .phase_fitness
            .iter_all()?
            .into_iter()
            .filter(|r| r.zooid == name)
            .collect();
        let (fitness_mean, evidence, fitness_ci95) =
            decay_weighted(&history, now, policy.phase_half_life_sec);
        let prod_guard_failures = self
            .prod_guard
            .as_ref()
            .map(|lookup| lookup.prod_guard_failures(name))
            .unwrap_or(0);

        let name_owned = name.to_string();
        let (from, updated, verdict, service_action) = self
            .registry
            .transaction(move |state| {
                let zooid = state
                    .zooids
                    .get_mut(&name_owned)
                    .ok_or_else(|| kloros_registry::RegistryError::NotFound(name_owned.clone()))?;
                zooid.phase.fitness_mean = fitness_mean;
                zooid.phase.evidence = evidence;
                zooid.phase.fitness_ci95 = fitness_ci95;
                zooid.phase.completed_ts = Some(now);

                let from = zooid.lifecycle_state;
                let verdict = kloros_lifecycle::evaluate_graduation(zooid, &policy, prod_guard_failures);
                let (req, to) = match verdict {
                    GraduationVerdict::Promote => {
                        (kloros_lifecycle::promote(zooid, now)?, LifecycleState::Active)
                    }
                    GraduationVerdict::RetryInsufficientEvidence | GraduationVerdict::RetryLowFitness => {
                        (kloros_lifecycle::retry(zooid, verdict, now)?, LifecycleState::Dormant)
                    }
                };
                let service_action = req.service_action;
                kloros_lifecycle::apply(zooid, req)?;
                state.reindex(&name_owned, to)?;
                let updated = state.zooids.get(&name_owned).unwrap().clone();
                Ok((from, updated, verdict, service_action))
            })
            .await?;

        let reason = match verdict {
            GraduationVerdict::Promote => Reason::GraduationGate,
            GraduationVerdict::RetryInsufficientEvidence => Reason::InsufficientEvidence,
            GraduationVerdict::RetryLowFitness => Reason::LowFitness,
        };
        let _ = self.lifecycle_log.record(&updated, from, reason, service_action).await;

        if verdict == GraduationVerdict::Promote {
            let deadline = now + chrono::Duration::seconds(policy.heartbeat_slo_sec as i64);
            self.pending_heartbeats
                .lock()
                .unwrap()
                .insert(updated.name.clone(), deadline);
            info!(zooid = %updated.name, deadline = %deadline, "promoted, awaiting first heartbeat");
        }
        Ok(())
    }

    /// Clear a pending rollback timer on the promoted zooid's first
    /// heartbeat.
    pub fn handle_heartbeat(&self, envelope: &Envelope) {
        self.pending_heartbeats.lock().unwrap().remove(&envelope.sender);
    }

    /// Roll back every promoted zooid whose heartbeat SLO has expired as of
    /// `now`.
    #[instrument(skip(self))]
    pub async fn sweep_heartbeats(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let expired: Vec<String> = {
            let pending = self.pending_heartbeats.lock().unwrap();
            pending
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(name, _)| name.clone())
                .collect()
        };

        let mut rolled_back = Vec::new();
        for name in expired {
            self.pending_heartbeats.lock().unwrap().remove(&name);
            if self.rollback_one(&name, now).await? {
                rolled_back.push(name);
            }
        }
        Ok(rolled_back)
    }

    async fn rollback_one(&self, name: &str, now: DateTime<Utc>) -> Result<bool> {
        let policy_table = Arc::clone(&self.policy);
        let name_owned = name.to_string();
        let outcome = self
            .registry
            .transaction(move |state| {
                let zooid = match state.zooids.get_mut(&name_owned) {
                    Some(z) => z,
                    None => return Ok(None),
                };
                if zooid.lifecycle_state != LifecycleState::Active {
                    return Ok(None);
                }
                let policy = policy_table.resolve(&zooid.niche.to_string());
                let from = zooid.lifecycle_state;
                let req = kloros_lifecycle::rollback_no_heartbeat(zooid, &policy, now)?;
                let to = req.to;
                let service_action = req.service_action;
                kloros_lifecycle::apply(zooid, req)?;
                state.reindex(&name_owned, to)?;
                let updated = state.zooids.get(&name_owned).unwrap().clone();
                Ok(Some((from, updated, service_action)))
            })
            .await?;

        let Some((from, updated, service_action)) = outcome else {
            return Ok(false);
        };
        let _ = self
            .lifecycle_log
            .record(&updated, from, Reason::RollbackNoHeartbeat, service_action)
            .await;

        let mut facts = Facts::new();
        facts.insert("zooid".into(), Value::String(updated.name.clone()));
        facts.insert("niche".into(), Value::String(updated.niche.to_string()));
        let _ = self
            .bus
            .emit(signals::ROLLBACK_NO_HEARTBEAT, &updated.niche.ecosystem, 1.0, facts, "graduator")
            .await;
        warn!(zooid = %updated.name, "rolled back for missing post-promotion heartbeat");
        Ok(true)
    }
}

#[async_trait]
impl SignalHandler for Graduator {
    async fn handle(&self, envelope: &Envelope) -> std::result::Result<(), String> {
        match envelope.signal.as_str() {
            s if s == signals::PHASE_BATCH_CLOSED => {
                self.handle_batch_closed(envelope).await.map_err(|e| e.to_string())
            }
            s if s == signals::HEARTBEAT => {
                self.handle_heartbeat(envelope);
                Ok(())
            }
            s if s == signals::SCHEDULE_TICK => {
                self.sweep_heartbeats(envelope.ts).await.map(|_| ()).map_err(|e| e.to_string())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kloros_core::{GenomeHash, NicheKey, PhaseSnapshot, PolicyOverrides, ProdSnapshot, Zooid};

    async fn harness() -> (Graduator, Arc<Registry>, Arc<LedgerStore<PhaseFitnessRecord>>, NicheKey, tempfile::TempDir)
    {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::load(dir.path().join("registry"), None).await.unwrap());
        let phase_fitness = Arc::new(LedgerStore::open(dir.path().join("ledger"), "phase_fitness").unwrap());
        let events = Arc::new(LedgerStore::open(dir.path().join("ledger"), "lifecycle_events").unwrap());
        let bus = ChemBus::new();
        let lifecycle_log = Arc::new(LifecycleEventLog::new(events, bus.clone()));
        let policy = Arc::new(LifecyclePolicyConfig::default());
        let niche = NicheKey::new("queue_management", "latency_monitoring");
        let graduator = Graduator::new(registry.clone(), phase_fitness.clone(), lifecycle_log, bus, policy, None);
        (graduator, registry, phase_fitness, niche, dir)
    }

    async fn insert_probation(registry: &Registry, name: &str, niche: &NicheKey) {
        let now = Utc::now();
        let name_owned = name.to_string();
        let niche_owned = niche.clone();
        registry
            .transaction(move |state| {
                state.insert_new(Zooid {
                    schema_version: "1.0".into(),
                    name: name_owned.clone(),
                    genome_hash: GenomeHash::of(name_owned.as_bytes(), b"pheno"),
                    niche: niche_owned,
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
                });
                let zooid = state.zooids.get_mut(&name_owned).unwrap();
                let req = kloros_lifecycle::batch_start(zooid, now)?;
                kloros_lifecycle::apply(zooid, req)?;
                state.reindex(&name_owned, LifecycleState::Probation)?;
                Ok(())
            })
            .await
            .unwrap();
    }

    fn sample(zooid: &str, fitness: f64, ts: DateTime<Utc>) -> PhaseFitnessRecord {
        PhaseFitnessRecord {
            ts,
            batch_id: "batch-1".into(),
            zooid: zooid.to_string(),
            attempt: 1,
            workload_profile_id: "sh:-c".into(),
            seed: 1,
            fitness,
            metrics: Default::default(),
            completed: true,
            timed_out: false,
            crashed: false,
            anomalies: vec![],
            duration_ms: 10,
        }
    }

    #[tokio::test]
    async fn sufficient_evidence_and_fitness_promotes() {
        let (graduator, registry, phase_fitness, niche, _dir) = harness().await;
        insert_probation(&registry, "lm_001", &niche).await;
        let now = Utc::now();
        for _ in 0..60 {
            phase_fitness.append(now.timestamp_millis(), &sample("lm_001", 0.9, now)).unwrap();
        }

        graduator.evaluate_candidate("lm_001", now).await.unwrap();

        let zooid = registry.get("lm_001").await.unwrap();
        assert_eq!(zooid.lifecycle_state, LifecycleState::Active);
        assert!(zooid.promoted_ts.is_some());
    }

    #[tokio::test]
    async fn insufficient_evidence_retries_to_dormant() {
        let (graduator, registry, phase_fitness, niche, _dir) = harness().await;
        insert_probation(&registry, "lm_002", &niche).await;
        let now = Utc::now();
        phase_fitness.append(now.timestamp_millis(), &sample("lm_002", 0.95, now)).unwrap();

        graduator.evaluate_candidate("lm_002", now).await.unwrap();

        let zooid = registry.get("lm_002").await.unwrap();
        assert_eq!(zooid.lifecycle_state, LifecycleState::Dormant);
    }

    #[tokio::test]
    async fn low_fitness_retries_to_dormant() {
        let (graduator, registry, phase_fitness, niche, _dir) = harness().await;
        insert_probation(&registry, "lm_003", &niche).await;
        let now = Utc::now();
        for _ in 0..60 {
            phase_fitness.append(now.timestamp_millis(), &sample("lm_003", 0.1, now)).unwrap();
        }

        graduator.evaluate_candidate("lm_003", now).await.unwrap();

        let zooid = registry.get("lm_003").await.unwrap();
        assert_eq!(zooid.lifecycle_state, LifecycleState::Dormant);
    }

    #[tokio::test]
    async fn heartbeat_clears_pending_rollback() {
        let (graduator, registry, phase_fitness, niche, _dir) = harness().await;
        insert_probation(&registry, "lm_004", &niche).await;
        let now = Utc::now();
        for _ in 0..60 {
            phase_fitness.append(now.timestamp_millis(), &sample("lm_004", 0.9, now)).unwrap();
        }
        graduator.evaluate_candidate("lm_004", now).await.unwrap();
        assert!(graduator.pending_heartbeats.lock().unwrap().contains_key("lm_004"));

        let envelope = Envelope {
            signal: "HEARTBEAT".into(),
            ecosystem: "queue_management".into(),
            intensity: 1.0,
            facts: Facts::new(),
            ts: Utc::now(),
            sender: "lm_004".into(),
            signature: None,
        };
        graduator.handle_heartbeat(&envelope);
        assert!(!graduator.pending_heartbeats.lock().unwrap().contains_key("lm_004"));

        let rolled_back = graduator.sweep_heartbeats(now + chrono::Duration::hours(1)).await.unwrap();
        assert!(rolled_back.is_empty());
        assert_eq!(registry.get("lm_004").await.unwrap().lifecycle_state, LifecycleState::Active);
    }

    #[tokio::test]
    async fn missing_heartbeat_rolls_back_to_dormant() {
        let (graduator, registry, phase_fitness, niche, _dir) = harness().await;
        insert_probation(&registry, "lm_005", &niche).await;
        let now = Utc::now();
        for _ in 0..60 {
            phase_fitness.append(now.timestamp_millis(), &sample("lm_005", 0.9, now)).unwrap();
        }
        graduator.evaluate_candidate("lm_005", now).await.unwrap();

        let rolled_back = graduator.sweep_heartbeats(now + chrono::Duration::hours(1)).await.unwrap();

        assert_eq!(rolled_back, vec!["lm_005".to_string()]);
        assert_eq!(registry.get("lm_005").await.unwrap().lifecycle_state, LifecycleState::Dormant);
    }
}
