//! The shared sink every lifecycle transition is recorded through: one
//! `lifecycle_events` append plus one `governance.zooid_state_change`
//! publication. Every component that drives a zooid
//! through `kloros_lifecycle::apply` calls this immediately after its
//! `Registry::transaction` commits, so the ledger and the bus never
//! disagree about which transitions actually happened.

use crate::error::Result;
use crate::store::LedgerStore;
use kloros_bus::{signals, ChemBus, Facts};
use kloros_core::{LifecycleEventRecord, LifecycleState, Zooid};
use kloros_lifecycle::{Reason, ServiceAction};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

/// Appends to `lifecycle_events` and republishes each row on the bus.
pub struct LifecycleEventLog {
    store: Arc<LedgerStore<LifecycleEventRecord>>,
    bus: Arc<ChemBus>,
}

impl LifecycleEventLog {
    /// Construct a log over an already-opened `lifecycle_events` stream.
    pub fn new(store: Arc<LedgerStore<LifecycleEventRecord>>, bus: Arc<ChemBus>) -> Self {
        Self { store, bus }
    }

    /// Record one transition. `zooid` must be the post-transition snapshot
    /// (the one written by the just-committed `Registry::transaction`);
    /// `from` is the state it held immediately beforehand.
    #[instrument(skip(self, zooid), fields(zooid = %zooid.name, from = %from, to = %zooid.lifecycle_state, reason = %reason))]
    pub async fn record(
        &self,
        zooid: &Zooid,
        from: LifecycleState,
        reason: Reason,
        service_action: Option<ServiceAction>,
    ) -> Result<()> {
        let record = LifecycleEventRecord {
            ts: zooid.last_transition_ts,
            zooid: zooid.name.clone(),
            genome_hash: zooid.genome_hash,
            from: from.to_string(),
            to: zooid.lifecycle_state.to_string(),
            reason: reason.as_str().to_string(),
            parent_lineage: zooid.parent_lineage.clone(),
            phase_fit: if zooid.phase.evidence > 0 {
                Some(zooid.phase.fitness_mean)
            } else {
                None
            },
            phase_ev: if zooid.phase.evidence > 0 {
                Some(zooid.phase.evidence)
            } else {
                None
            },
            prod_ok: if zooid.prod.evidence > 0 {
                Some(zooid.prod.ok_rate)
            } else {
                None
            },
            prod_ev: if zooid.prod.evidence > 0 {
                Some(zooid.prod.evidence)
            } else {
                None
            },
            service_action: service_action.map(|a| a.to_string()),
        };
        self.store.append(record.ts.timestamp_millis(), &record)?;

        let mut facts = Facts::new();
        facts.insert("zooid".into(), Value::String(record.zooid.clone()));
        facts.insert("genome_hash".into(), Value::String(record.genome_hash.to_string()));
        facts.insert("from".into(), Value::String(record.from.clone()));
        facts.insert("to".into(), Value::String(record.to.clone()));
        facts.insert("reason".into(), Value::String(record.reason.clone()));
        if let Some(action) = &record.service_action {
            facts.insert("service_action".into(), Value::String(action.clone()));
        }
        let _ = self
            .bus
            .emit(signals::ZOOID_STATE_CHANGE, "", 1.0, facts, "lifecycle_log")
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kloros_core::{GenomeHash, NicheKey, PhaseSnapshot, PolicyOverrides, ProdSnapshot};

    fn zooid(state: LifecycleState) -> Zooid {
        let now = chrono::Utc::now();
        Zooid {
            schema_version: "1.0".into(),
            name: "lm_001".into(),
            genome_hash: GenomeHash::of(b"src", b"pheno"),
            niche: NicheKey::new("queue_management", "latency_monitoring"),
            lifecycle_state: state,
            entered_ts: now,
            promoted_ts: None,
            last_transition_ts: now,
            retired_ts: None,
            parent_lineage: vec!["lm_000".into()],
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
    async fn record_appends_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LedgerStore::open(dir.path(), "lifecycle_events").unwrap());
        let bus = ChemBus::new();
        let log = LifecycleEventLog::new(store.clone(), bus.clone());

        log.record(
            &zooid(LifecycleState::Active),
            LifecycleState::Probation,
            Reason::GraduationGate,
            Some(ServiceAction::Start),
        )
        .await
        .unwrap();

        assert_eq!(store.len(), 1);
        let rows = store.iter_all().unwrap();
        assert_eq!(rows[0].from, "PROBATION");
        assert_eq!(rows[0].to, "ACTIVE");
        assert_eq!(rows[0].reason, "phase_threshold_met");
        assert_eq!(rows[0].service_action.as_deref(), Some("start"));
    }
}
