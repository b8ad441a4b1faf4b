//! Record shapes persisted by the ledger streams.

use crate::genome::GenomeHash;
use crate::niche::NicheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A zooid queued for the next PHASE batch (`phase_queue` stream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseQueueRecord {
    /// Timestamp the zooid was enqueued.
    pub ts: DateTime<Utc>,
    /// Zooid name.
    pub zooid: String,
    /// Batch the zooid was assigned to, once dispatched.
    pub batch_id: Option<String>,
}

/// One synthetic fitness observation produced by a PHASE batch (`phase_fitness` stream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseFitnessRecord {
    /// Timestamp the observation was recorded.
    pub ts: DateTime<Utc>,
    /// Batch this observation belongs to.
    pub batch_id: String,
    /// Zooid being evaluated.
    pub zooid: String,
    /// Which observation this is within the batch's configured sample count,
    /// starting at 1.
    pub attempt: u32,
    /// Workload profile the candidate was driven against.
    pub workload_profile_id: String,
    /// Seed handed to the sandboxed driver for this attempt.
    pub seed: u64,
    /// Composite fitness score in `[0, 1]`.
    pub fitness: f64,
    /// Raw per-metric scores the composite was derived from.
    pub metrics: std::collections::BTreeMap<String, f64>,
    /// Whether the synthetic workload completed without crashing.
    pub completed: bool,
    /// Whether the attempt was killed for exceeding its timeout.
    pub timed_out: bool,
    /// Whether the attempt matched the niche's configured catastrophic rule.
    pub crashed: bool,
    /// Anomaly labels the driver reported, if any.
    pub anomalies: Vec<String>,
    /// Wall-clock duration of the sandboxed run, in milliseconds.
    pub duration_ms: u64,
}

/// One production fitness observation (`fitness_ledger` stream,).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitnessLedgerRecord {
    /// Timestamp of the observation.
    pub ts: DateTime<Utc>,
    /// Zooid the observation concerns.
    pub zooid: String,
    /// Niche the zooid was serving.
    pub niche: NicheKey,
    /// Ecosystem the zooid was serving (denormalized for consolidation scans).
    pub ecosystem: String,
    /// Whether the handled unit of work succeeded.
    pub ok: bool,
    /// Time to resolution, in milliseconds.
    pub ttr_ms: u64,
    /// Correlated incident identifier, if this observation followed an incident.
    pub incident_id: Option<String>,
    /// HMAC-SHA256 over the canonicalized fields above, hex-encoded.
    pub signature: String,
}

/// A lifecycle state transition (`lifecycle_events` stream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEventRecord {
    /// Timestamp of the transition.
    pub ts: DateTime<Utc>,
    /// Zooid that transitioned.
    pub zooid: String,
    /// Genome hash at the time of transition.
    pub genome_hash: GenomeHash,
    /// Originating lifecycle state.
    pub from: String,
    /// Destination lifecycle state.
    pub to: String,
    /// Human-readable cause, e.g. `"phase_threshold_met"`, `"quarantine_tripped"`.
    pub reason: String,
    /// Ancestor names at time of transition.
    pub parent_lineage: Vec<String>,
    /// Synthetic fitness mean backing the transition, if applicable.
    pub phase_fit: Option<f64>,
    /// Synthetic evidence count backing the transition, if applicable.
    pub phase_ev: Option<u32>,
    /// Production ok-rate backing the transition, if applicable.
    pub prod_ok: Option<f64>,
    /// Production evidence count backing the transition, if applicable.
    pub prod_ev: Option<u64>,
    /// Service action issued alongside the transition, e.g. `"spawn"`, `"kill"`.
    pub service_action: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitness_ledger_record_round_trips_through_json() {
        let rec = FitnessLedgerRecord {
            ts: Utc::now(),
            zooid: "lm_001".into(),
            niche: NicheKey::new("queue_management", "latency_monitoring"),
            ecosystem: "queue_management".into(),
            ok: true,
            ttr_ms: 120,
            incident_id: None,
            signature: "abc123".into(),
        };
        let json = serde_json::to_string(&rec).unwrap();
        let back: FitnessLedgerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn phase_fitness_record_round_trips_through_json() {
        let mut metrics = std::collections::BTreeMap::new();
        metrics.insert("throughput".to_string(), 0.81);
        metrics.insert("error_rate".to_string(), 0.02);
        let rec = PhaseFitnessRecord {
            ts: Utc::now(),
            batch_id: "batch-0001".into(),
            zooid: "lm_002".into(),
            attempt: 1,
            workload_profile_id: "queue_management.latency_monitoring".into(),
            seed: 42,
            fitness: 0.77,
            metrics,
            completed: true,
            timed_out: false,
            crashed: false,
            anomalies: vec![],
            duration_ms: 4500,
        };
        let json = serde_json::to_string(&rec).unwrap();
        let back: PhaseFitnessRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn lifecycle_event_record_round_trips_through_json() {
        let rec = LifecycleEventRecord {
            ts: Utc::now(),
            zooid: "lm_001".into(),
            genome_hash: GenomeHash::of(b"src", b"pheno"),
            from: "PROBATION".into(),
            to: "ACTIVE".into(),
            reason: "phase_threshold_met".into(),
            parent_lineage: vec!["lm_000".into()],
            phase_fit: Some(0.92),
            phase_ev: Some(40),
            prod_ok: None,
            prod_ev: None,
            service_action: Some("promote".into()),
        };
        let json = serde_json::to_string(&rec).unwrap();
        let back: LifecycleEventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }
}
