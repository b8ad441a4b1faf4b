//! The Quarantine Monitor: a rolling per-zooid production-failure window
//! that trips the ACTIVE -> DORMANT demotion gate. Subscribes
//! to `OBSERVATION` alongside the Ledger Writer, but only cares about the
//! `ok` flag and timestamp, not persistence, that is `kloros-ledger`'s job.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kloros_bus::{signals, ChemBus, Envelope, Facts, SignalHandler};
use kloros_config::LifecyclePolicyConfig;
use kloros_core::{LifecycleState, ProdGuardFailureLookup};
use kloros_ledger::LifecycleEventLog;
use kloros_registry::Registry;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{instrument, warn};

/// One zooid's rolling window: recent failure timestamps plus the
/// last-quarantine-signal timestamp used for the per-zooid rate limit
/// (step 4: "at most one quarantine signal per zooid per
/// quarantine window").
#[derive(Debug, Clone, Default)]
struct Window {
    failures: Vec<DateTime<Utc>>,
    last_signal_ts: Option<DateTime<Utc>>,
}

/// Watches production `OBSERVATION` outcomes and demotes an ACTIVE zooid
/// once its rolling failure count trips the threshold.
pub struct QuarantineMonitor {
    registry: Arc<Registry>,
    lifecycle_log: Arc<LifecycleEventLog>,
    bus: Arc<ChemBus>,
    policy: Arc<LifecyclePolicyConfig>,
    windows: Mutex<HashMap<String, Window>>,
    /// Outstanding guard-failure counts exposed to the Graduator via
    /// [`ProdGuardFailureLookup`], a live count, not the lifetime
    /// `demotions` tally.
    outstanding: Arc<RwLock<HashMap<String, u32>>>,
}

impl QuarantineMonitor {
    /// Construct a monitor over a shared registry and lifecycle event log.
    pub fn new(
        registry: Arc<Registry>,
        lifecycle_log: Arc<LifecycleEventLog>,
        bus: Arc<ChemBus>,
        policy: Arc<LifecyclePolicyConfig>,
    ) -> Self {
        Self {
            registry,
            lifecycle_log,
            bus,
            policy,
            windows: Mutex::new(HashMap::new()),
            outstanding: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A [`ProdGuardFailureLookup`] handle the Graduator can hold without
    /// depending on this crate's internals.
    pub fn guard_lookup(&self) -> Arc<dyn ProdGuardFailureLookup> {
        Arc::new(OutstandingGuard(Arc::clone(&self.outstanding)))
    }

    /// Process one `OBSERVATION` envelope's failure/success outcome against
    /// the zooid's rolling window.
    #[instrument(skip(self, envelope))]
    pub async fn handle_observation(&self, envelope: &Envelope) -> Result<()> {
        let Some(zooid) = envelope.facts.get("zooid").and_then(Value::as_str) else {
            return Ok(());
        };
        let ok = envelope.facts.get("ok").and_then(Value::as_bool).unwrap_or(true);
        if ok {
            return Ok(());
        }

        let Some(current) = self.registry.get(zooid).await else {
            return Ok(());
        };
        let policy = self.policy.resolve(&current.niche.to_string());
        let now = envelope.ts;
        let window_sec = policy.quarantine_window_sec;

        let (should_trip, failure_count) = {
            let mut windows = self.windows.lock().unwrap();
            let window = windows.entry(zooid.to_string()).or_default();
            window.failures.push(now);
            let cutoff = now - chrono::Duration::seconds(window_sec as i64);
            window.failures.retain(|ts| *ts >= cutoff);
            let count = window.failures.len() as u32;

            let rate_limited = match window.last_signal_ts {
                Some(last) => (now - last).num_seconds() < window_sec as i64,
                None => false,
            };
            let trip = count >= policy.prod_guard_failures_threshold && !rate_limited;
            if trip {
                window.last_signal_ts = Some(now);
            }
            (trip, count)
        };

        self.outstanding
            .write()
            .unwrap()
            .insert(zooid.to_string(), failure_count);

        if should_trip && current.lifecycle_state == LifecycleState::Active {
            self.trip_quarantine(zooid, failure_count, window_sec, now).await?;
        }
        Ok(())
    }

    async fn trip_quarantine(
        &self,
        name: &str,
        failure_count: u32,
        window_sec: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let policy_table = Arc::clone(&self.policy);
        let name_owned = name.to_string();
        let (from, updated, reason, service_action) = self
            .registry
            .transaction(move |state| {
                let zooid = state
                    .zooids
                    .get_mut(&name_owned)
                    .ok_or_else(|| kloros_registry::RegistryError::NotFound(name_owned.clone()))?;
                let policy = policy_table.resolve(&zooid.niche.to_string());
                let from = zooid.lifecycle_state;
                let req = kloros_lifecycle::quarantine(zooid, &policy, now)?;
                let to = req.to;
                let reason = req.reason;
                let service_action = req.service_action;
                kloros_lifecycle::apply(zooid, req)?;
                state.reindex(&name_owned, to)?;
                let updated = state.zooids.get(&name_owned).unwrap().clone();
                Ok((from, updated, reason, service_action))
            })
            .await?;

        let _ = self.lifecycle_log.record(&updated, from, reason, service_action).await;

        self.outstanding.write().unwrap().remove(name);
        self.windows.lock().unwrap().remove(name);

        let mut facts = Facts::new();
        facts.insert("zooid".into(), Value::String(name.to_string()));
        facts.insert("failure_count".into(), Value::from(failure_count));
        facts.insert("window_sec".into(), Value::from(window_sec));
        let _ = self
            .bus
            .emit(signals::QUARANTINE_TRIPPED, &updated.niche.ecosystem, 1.0, facts, "quarantine_monitor")
            .await;
        warn!(zooid = name, failure_count, reason = %reason, "quarantine tripped on production failures");
        Ok(())
    }
}

/// The `ProdGuardFailureLookup` implementation handed to the Graduator.
struct OutstandingGuard(Arc<RwLock<HashMap<String, u32>>>);

impl ProdGuardFailureLookup for OutstandingGuard {
    fn prod_guard_failures(&self, zooid: &str) -> u32 {
        self.0.read().unwrap().get(zooid).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SignalHandler for QuarantineMonitor {
    async fn handle(&self, envelope: &Envelope) -> std::result::Result<(), String> {
        if envelope.signal != signals::OBSERVATION {
            return Ok(());
        }
        self.handle_observation(envelope).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kloros_core::{GenomeHash, NicheKey, PhaseSnapshot, PolicyOverrides, ProdSnapshot, Zooid};

    async fn harness() -> (QuarantineMonitor, Arc<Registry>, NicheKey, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::load(dir.path().join("registry"), None).await.unwrap());
        let events = Arc::new(kloros_ledger::LedgerStore::open(dir.path().join("ledger"), "lifecycle_events").unwrap());
        let bus = ChemBus::new();
        let lifecycle_log = Arc::new(LifecycleEventLog::new(events, bus.clone()));
        let policy = Arc::new(LifecyclePolicyConfig::default());
        let niche = NicheKey::new("queue_management", "latency_monitoring");
        let monitor = QuarantineMonitor::new(registry.clone(), lifecycle_log, bus, policy);
        (monitor, registry, niche, dir)
    }

    async fn insert_active(registry: &Registry, name: &str, niche: &NicheKey) {
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
    }

    fn observation(zooid: &str, ok: bool, ts: DateTime<Utc>) -> Envelope {
        let mut facts = Facts::new();
        facts.insert("zooid".into(), Value::String(zooid.into()));
        facts.insert("ok".into(), Value::Bool(ok));
        Envelope {
            signal: signals::OBSERVATION.into(),
            ecosystem: "queue_management".into(),
            intensity: 1.0,
            facts,
            ts,
            sender: zooid.into(),
            signature: None,
        }
    }

    #[tokio::test]
    async fn three_failures_in_window_trip_quarantine() {
        let (monitor, registry, niche, _dir) = harness().await;
        insert_active(&registry, "lm_001", &niche).await;
        let t0 = Utc::now();

        monitor.handle_observation(&observation("lm_001", false, t0)).await.unwrap();
        monitor
            .handle_observation(&observation("lm_001", false, t0 + chrono::Duration::seconds(100)))
            .await
            .unwrap();
        let zooid = registry.get("lm_001").await.unwrap();
        assert_eq!(zooid.lifecycle_state, LifecycleState::Active);

        monitor
            .handle_observation(&observation("lm_001", false, t0 + chrono::Duration::seconds(200)))
            .await
            .unwrap();
        let zooid = registry.get("lm_001").await.unwrap();
        assert_eq!(zooid.lifecycle_state, LifecycleState::Dormant);
        assert_eq!(zooid.demotions, 1);
        assert!(zooid.quarantine_until.is_some());
    }

    #[tokio::test]
    async fn successes_do_not_count_against_the_window() {
        let (monitor, registry, niche, _dir) = harness().await;
        insert_active(&registry, "lm_002", &niche).await;
        let t0 = Utc::now();

        monitor.handle_observation(&observation("lm_002", false, t0)).await.unwrap();
        monitor.handle_observation(&observation("lm_002", true, t0)).await.unwrap();
        monitor.handle_observation(&observation("lm_002", false, t0)).await.unwrap();

        assert_eq!(registry.get("lm_002").await.unwrap().lifecycle_state, LifecycleState::Active);
    }

    #[tokio::test]
    async fn failures_outside_window_age_out() {
        let (monitor, registry, niche, _dir) = harness().await;
        insert_active(&registry, "lm_003", &niche).await;
        let t0 = Utc::now();

        monitor.handle_observation(&observation("lm_003", false, t0)).await.unwrap();
        monitor
            .handle_observation(&observation(
                "lm_003",
                false,
                t0 + chrono::Duration::seconds(901),
            ))
            .await
            .unwrap();
        monitor
            .handle_observation(&observation(
                "lm_003",
                false,
                t0 + chrono::Duration::seconds(902),
            ))
            .await
            .unwrap();

        assert_eq!(registry.get("lm_003").await.unwrap().lifecycle_state, LifecycleState::Active);
    }

    #[tokio::test]
    async fn demotion_at_the_ceiling_still_recooldowns() {
        let (monitor, registry, niche, _dir) = harness().await;
        insert_active(&registry, "lm_004", &niche).await;
        let now = Utc::now();
        registry
            .transaction(move |state| {
                state.zooids.get_mut("lm_004").unwrap().demotions = 1;
                Ok(())
            })
            .await
            .unwrap();

        let t0 = now;
        for offset in [0, 100, 200] {
            monitor
                .handle_observation(&observation("lm_004", false, t0 + chrono::Duration::seconds(offset)))
                .await
                .unwrap();
        }

        let zooid = registry.get("lm_004").await.unwrap();
        assert_eq!(zooid.lifecycle_state, LifecycleState::Dormant);
        assert_eq!(zooid.demotions, 2);
    }

    #[tokio::test]
    async fn demotion_past_the_ceiling_retires_instead_of_recooldown() {
        let (monitor, registry, niche, _dir) = harness().await;
        insert_active(&registry, "lm_006", &niche).await;
        let now = Utc::now();
        registry
            .transaction(move |state| {
                state.zooids.get_mut("lm_006").unwrap().demotions = 2;
                Ok(())
            })
            .await
            .unwrap();

        let t0 = now;
        for offset in [0, 100, 200] {
            monitor
                .handle_observation(&observation("lm_006", false, t0 + chrono::Duration::seconds(offset)))
                .await
                .unwrap();
        }

        let zooid = registry.get("lm_006").await.unwrap();
        assert_eq!(zooid.lifecycle_state, LifecycleState::Retired);
        assert_eq!(zooid.demotions, 2);
    }

    #[tokio::test]
    async fn guard_lookup_reflects_outstanding_failures_until_trip() {
        let (monitor, registry, niche, _dir) = harness().await;
        insert_active(&registry, "lm_005", &niche).await;
        let lookup = monitor.guard_lookup();
        assert_eq!(lookup.prod_guard_failures("lm_005"), 0);

        let t0 = Utc::now();
        monitor.handle_observation(&observation("lm_005", false, t0)).await.unwrap();
        assert_eq!(lookup.prod_guard_failures("lm_005"), 1);

        monitor
            .handle_observation(&observation("lm_005", false, t0 + chrono::Duration::seconds(1)))
            .await
            .unwrap();
        monitor
            .handle_observation(&observation("lm_005", false, t0 + chrono::Duration::seconds(2)))
            .await
            .unwrap();
        // Tripped: outstanding count cleared since the zooid has already
        // been demoted and its window reset.
        assert_eq!(lookup.prod_guard_failures("lm_005"), 0);
    }
}
