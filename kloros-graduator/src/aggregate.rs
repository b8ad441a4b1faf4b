//! Decay-weighted aggregation of a zooid's `phase_fitness` attempts into the
//! `fitness_mean` / `evidence` / `fitness_ci95` triple the graduation gate
//! reads.

use chrono::{DateTime, Utc};
use kloros_core::PhaseFitnessRecord;

/// 95% z-score for a normal approximation of the weighted mean's sampling
/// distribution.
const Z_95: f64 = 1.96;

/// Fold `records` into `(fitness_mean, evidence, fitness_ci95)` using an
/// exponential half-life decay: an attempt `half_life_sec` old counts for
/// half the evidence of one made now. Older probation attempts are never
/// discarded outright, since the decay already pushes their weight toward
/// zero.
pub fn decay_weighted(records: &[PhaseFitnessRecord], now: DateTime<Utc>, half_life_sec: u64) -> (f64, u32, f64) {
    if records.is_empty() {
        return (0.0, 0, 0.0);
    }

    let half_life = half_life_sec.max(1) as f64;
    let mut weights = Vec::with_capacity(records.len());
    let mut weight_sum = 0.0_f64;
    let mut weighted_fitness = 0.0_f64;
    for record in records {
        let age_sec = (now - record.ts).num_seconds().max(0) as f64;
        let weight = 0.5_f64.powf(age_sec / half_life);
        weights.push(weight);
        weight_sum += weight;
        weighted_fitness += weight * record.fitness;
    }

    if weight_sum <= 0.0 {
        return (0.0, 0, 0.0);
    }

    let mean = weighted_fitness / weight_sum;
    let weighted_variance: f64 = records
        .iter()
        .zip(&weights)
        .map(|(record, weight)| weight * (record.fitness - mean).powi(2))
        .sum::<f64>()
        / weight_sum;
    let ci95 = Z_95 * (weighted_variance / weight_sum).sqrt();

    (mean, weight_sum.round().max(0.0) as u32, ci95)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fitness: f64, ts: DateTime<Utc>) -> PhaseFitnessRecord {
        PhaseFitnessRecord {
            ts,
            batch_id: "batch-1".into(),
            zooid: "lm_001".into(),
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

    #[test]
    fn empty_history_yields_no_evidence() {
        let (mean, evidence, ci95) = decay_weighted(&[], Utc::now(), 3600);
        assert_eq!(mean, 0.0);
        assert_eq!(evidence, 0);
        assert_eq!(ci95, 0.0);
    }

    #[test]
    fn single_fresh_record_reproduces_its_own_fitness() {
        let now = Utc::now();
        let records = vec![record(0.8, now)];
        let (mean, evidence, ci95) = decay_weighted(&records, now, 3600);
        assert!((mean - 0.8).abs() < 1e-9);
        assert_eq!(evidence, 1);
        assert_eq!(ci95, 0.0);
    }

    #[test]
    fn ancient_record_barely_moves_a_fresh_majority() {
        let now = Utc::now();
        let half_life = 100u64;
        let ancient = now - chrono::Duration::seconds(100 * 40);
        let mut records = vec![record(0.0, ancient)];
        for _ in 0..20 {
            records.push(record(0.9, now));
        }
        let (mean, _evidence, _ci95) = decay_weighted(&records, now, half_life);
        assert!(mean > 0.89, "ancient outlier should be decayed to near nothing, got {mean}");
    }

    #[test]
    fn evidence_count_decays_with_age() {
        let now = Utc::now();
        let half_life = 3600u64;
        let one_half_life_ago = now - chrono::Duration::seconds(3600);
        let records = vec![record(0.5, one_half_life_ago)];
        let (_mean, evidence, _ci95) = decay_weighted(&records, now, half_life);
        assert_eq!(evidence, 1);
    }
}
