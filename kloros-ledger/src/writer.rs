//! The Ledger Writer: sole writer of `fitness_ledger`. Verifies
//! the HMAC on every `OBSERVATION`, appends valid ones to the append-only
//! store, and periodically rolls the per-zooid `prod.*` fields up onto the
//! Registry. Subscriber-queue back-pressure (drop lowest-intensity first on
//! overflow, `governance.backpressure`) is handled by `ChemBus` itself; this
//! component only needs to reject and count bad signatures and batch its
//! own roll-up work.

use crate::error::{LedgerError, Result};
use crate::hmac_sign::{verify_facts, KeyRing};
use crate::store::LedgerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kloros_bus::{ChemBus, Envelope, Facts, SignalHandler};
use kloros_core::{FitnessLedgerRecord, NicheKey};
use kloros_registry::Registry;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, instrument, warn};

/// Minimum spacing between `governance.signature_fail` emissions (/// Scenario E: "at most once per 60s window").
const SIGNATURE_FAIL_EMIT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// In-flight per-zooid production-outcome accumulation, merged into the
/// Registry's `prod.*` snapshot on roll-up.
#[derive(Debug, Clone, Default)]
struct PendingRollup {
    observations: Vec<(bool, u64, DateTime<Utc>)>,
}

/// Subscribes to `OBSERVATION`, verifies and persists it, and rolls
/// accumulated production outcomes up onto the Registry.
pub struct LedgerWriter {
    keyring: KeyRing,
    store: Arc<LedgerStore<FitnessLedgerRecord>>,
    registry: Arc<Registry>,
    bus: Arc<ChemBus>,
    /// Observations accumulated per zooid since the last roll-up.
    pending: Mutex<HashMap<String, PendingRollup>>,
    /// Roll up a zooid's pending observations once this many have
    /// accumulated, or once the rollup interval elapses.
    rollup_every: usize,
    invalid_signatures_total: AtomicU64,
    last_signature_fail_emit: Mutex<Option<Instant>>,
}

impl LedgerWriter {
    /// Construct a writer over `store`, verifying with `keyring` and
    /// rolling up onto `registry`. `bus` is used to emit governance signals.
    /// `rollup_every` bounds how many observations accumulate per zooid
    /// before their `prod.*` fields are merged onto the registry.
    pub fn new(
        keyring: KeyRing,
        store: Arc<LedgerStore<FitnessLedgerRecord>>,
        registry: Arc<Registry>,
        bus: Arc<ChemBus>,
        rollup_every: usize,
    ) -> Self {
        Self {
            keyring,
            store,
            registry,
            bus,
            pending: Mutex::new(HashMap::new()),
            rollup_every: rollup_every.max(1),
            invalid_signatures_total: AtomicU64::new(0),
            last_signature_fail_emit: Mutex::new(None),
        }
    }

    /// Total observations rejected for a bad signature so far.
    pub fn invalid_signatures_total(&self) -> u64 {
        self.invalid_signatures_total.load(Ordering::SeqCst)
    }

    /// Process one `OBSERVATION` envelope end to end (steps 1-3).
    #[instrument(skip(self, envelope), fields(sender = %envelope.sender))]
    pub async fn process_observation(&self, envelope: &Envelope) -> Result<()> {
        let Some(signature) = &envelope.signature else {
            self.reject_signature().await;
            return Ok(());
        };
        if verify_facts(&self.keyring, &envelope.facts, signature).is_err() {
            self.reject_signature().await;
            return Ok(());
        }

        let record = match parse_record(envelope) {
            Some(r) => r,
            None => {
                warn!("OBSERVATION envelope missing required fields, dropping");
                return Ok(());
            }
        };

        self.store.append(record.ts.timestamp_millis(), &record)?;

        let mut pending = self.pending.lock().await;
        let entry = pending.entry(record.zooid.clone()).or_default();
        entry.observations.push((record.ok, record.ttr_ms, record.ts));
        let ready = entry.observations.len() >= self.rollup_every;
        let zooid = record.zooid.clone();
        drop(pending);

        if ready {
            self.flush_rollup(&zooid).await?;
        }
        Ok(())
    }

    async fn reject_signature(&self) {
        self.invalid_signatures_total.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last_signature_fail_emit.lock().await;
        let now = Instant::now();
        let should_emit = match *last {
            Some(prev) => now.duration_since(prev) >= SIGNATURE_FAIL_EMIT_INTERVAL,
            None => true,
        };
        if should_emit {
            *last = Some(now);
            let mut facts = Facts::new();
            facts.insert(
                "invalid_signatures_total".into(),
                Value::from(self.invalid_signatures_total()),
            );
            let _ = self
                .bus
                .emit("governance.signature_fail", "", 1.0, facts, "ledger_writer")
                .await;
        }
    }

    /// Merge one zooid's pending observations into its Registry `prod.*`
    /// snapshot via a single transaction.
    #[instrument(skip(self))]
    pub async fn flush_rollup(&self, zooid_name: &str) -> Result<()> {
        let batch = {
            let mut pending = self.pending.lock().await;
            match pending.remove(zooid_name) {
                Some(p) if !p.observations.is_empty() => p.observations,
                _ => return Ok(()),
            }
        };

        let name = zooid_name.to_string();
        self.registry
            .transaction(move |state| {
                let zooid = state
                    .zooids
                    .get_mut(&name)
                    .ok_or_else(|| kloros_registry::RegistryError::NotFound(name.clone()))?;
                let mut evidence = zooid.prod.evidence;
                let mut ok_rate = zooid.prod.ok_rate;
                let mut ttr_mean = zooid.prod.ttr_ms_mean;
                let mut last_ts = zooid.prod.last_ts;

                for (ok, ttr_ms, ts) in &batch {
                    let new_evidence = evidence + 1;
                    ok_rate = (ok_rate * evidence as f64 + if *ok { 1.0 } else { 0.0 })
                        / new_evidence as f64;
                    ttr_mean = (ttr_mean * evidence as f64 + *ttr_ms as f64) / new_evidence as f64;
                    evidence = new_evidence;
                    last_ts = Some((*ts).max(last_ts.unwrap_or(*ts)));
                }

                zooid.prod.evidence = evidence;
                zooid.prod.ok_rate = ok_rate;
                zooid.prod.ttr_ms_mean = ttr_mean;
                zooid.prod.last_ts = last_ts;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn parse_record(envelope: &Envelope) -> Option<FitnessLedgerRecord> {
    let zooid = envelope.facts.get("zooid")?.as_str()?.to_string();
    let niche = envelope.facts.get("niche")?.as_str()?.to_string();
    let ecosystem = envelope.facts.get("ecosystem")?.as_str()?.to_string();
    let ok = envelope.facts.get("ok")?.as_bool()?;
    let ttr_ms = envelope.facts.get("ttr_ms")?.as_u64()?;
    let incident_id = envelope
        .facts
        .get("incident_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Some(FitnessLedgerRecord {
        ts: envelope.ts,
        zooid,
        niche: NicheKey::new(ecosystem.clone(), niche),
        ecosystem,
        ok,
        ttr_ms,
        incident_id,
        signature: envelope.signature.clone().unwrap_or_default(),
    })
}

#[async_trait]
impl SignalHandler for LedgerWriter {
    async fn handle(&self, envelope: &Envelope) -> std::result::Result<(), String> {
        self.process_observation(envelope).await.map_err(|e| {
            error!(error = %e, "ledger writer failed to persist observation");
            e.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kloros_core::{GenomeHash, LifecycleState, PhaseSnapshot, PolicyOverrides, ProdSnapshot, Zooid};
    use kloros_registry::Registry;

    async fn registry_with_zooid(dir: &std::path::Path, name: &str) -> Arc<Registry> {
        let registry = Arc::new(Registry::load(dir, None).await.unwrap());
        let now = Utc::now();
        let niche = NicheKey::new("queue_management", "latency_monitoring");
        let name_owned = name.to_string();
        registry
            .transaction(move |state| {
                state.insert_new(Zooid {
                    schema_version: "1.0".into(),
                    name: name_owned.clone(),
                    genome_hash: GenomeHash::of(name_owned.as_bytes(), b"pheno"),
                    niche,
                    lifecycle_state: LifecycleState::Active,
                    entered_ts: now,
                    promoted_ts: Some(now),
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
                Ok(())
            })
            .await
            .unwrap();
        registry
    }

    fn observation_envelope(ring: &KeyRing, zooid: &str, ok: bool, ttr_ms: u64) -> Envelope {
        let mut facts = Facts::new();
        facts.insert("zooid".into(), Value::String(zooid.into()));
        facts.insert("niche".into(), Value::String("latency_monitoring".into()));
        facts.insert("ecosystem".into(), Value::String("queue_management".into()));
        facts.insert("ok".into(), Value::Bool(ok));
        facts.insert("ttr_ms".into(), Value::from(ttr_ms));
        let sig = crate::hmac_sign::sign_facts(ring, &facts).unwrap();
        Envelope {
            signal: "OBSERVATION".into(),
            ecosystem: "queue_management".into(),
            intensity: 1.0,
            facts,
            ts: Utc::now(),
            sender: zooid.into(),
            signature: Some(sig),
        }
    }

    #[tokio::test]
    async fn valid_observation_is_stored_and_rolled_up() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with_zooid(dir.path(), "lm_001").await;
        let store = Arc::new(LedgerStore::open(dir.path().join("lineage"), "fitness_ledger").unwrap());
        let bus = ChemBus::new();
        let ring = KeyRing::single("k1", vec![9, 9, 9, 9]);

        let writer = LedgerWriter::new(ring.clone(), store.clone(), registry.clone(), bus, 1);
        let envelope = observation_envelope(&ring, "lm_001", true, 120);
        writer.process_observation(&envelope).await.unwrap();

        assert_eq!(store.len(), 1);
        let zooid = registry.get("lm_001").await.unwrap();
        assert_eq!(zooid.prod.evidence, 1);
        assert_eq!(zooid.prod.ok_rate, 1.0);
        assert_eq!(zooid.prod.ttr_ms_mean, 120.0);
    }

    #[tokio::test]
    async fn invalid_signature_is_dropped_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with_zooid(dir.path(), "lm_001").await;
        let store = Arc::new(LedgerStore::open(dir.path().join("lineage"), "fitness_ledger").unwrap());
        let bus = ChemBus::new();
        let signing_ring = KeyRing::single("k1", vec![1, 2, 3]);
        let verifying_ring = KeyRing::single("k1", vec![9, 9, 9]);

        let writer = LedgerWriter::new(verifying_ring, store.clone(), registry, bus, 1);
        let envelope = observation_envelope(&signing_ring, "lm_001", true, 50);
        writer.process_observation(&envelope).await.unwrap();

        assert_eq!(store.len(), 0);
        assert_eq!(writer.invalid_signatures_total(), 1);
    }

    #[tokio::test]
    async fn rollup_batches_until_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with_zooid(dir.path(), "lm_001").await;
        let store = Arc::new(LedgerStore::open(dir.path().join("lineage"), "fitness_ledger").unwrap());
        let bus = ChemBus::new();
        let ring = KeyRing::single("k1", vec![9, 9, 9, 9]);

        let writer = LedgerWriter::new(ring.clone(), store.clone(), registry.clone(), bus, 3);
        for i in 0..2 {
            let envelope = observation_envelope(&ring, "lm_001", true, 100 + i);
            writer.process_observation(&envelope).await.unwrap();
        }
        // Below threshold: no roll-up yet.
        assert_eq!(registry.get("lm_001").await.unwrap().prod.evidence, 0);

        let envelope = observation_envelope(&ring, "lm_001", false, 100);
        writer.process_observation(&envelope).await.unwrap();
        let zooid = registry.get("lm_001").await.unwrap();
        assert_eq!(zooid.prod.evidence, 3);
    }
}
