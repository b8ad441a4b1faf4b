//! Deterministic tournament selection over a niche's ACTIVE defenders
//!.
//!
//! Scores are read from each defender's already-aggregated `phase`/`prod`
//! snapshots rather than re-scanning raw `fitness_ledger`/`phase_fitness`
//! rows: the Ledger Writer and Graduator already maintain those as
//! continuously-updated decay-weighted aggregates, so re-deriving the same
//! number from the raw rows here would just duplicate that logic.

use kloros_core::Zooid;

/// One defender's tournament score, deterministic and ordered `(score DESC,
/// name ASC)` so re-running a tick against unchanged state always reaches
/// the same verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub name: String,
    pub score: f64,
}

fn composite_score(zooid: &Zooid) -> f64 {
    if zooid.phase.evidence > 0 {
        0.5 * zooid.prod.ok_rate + 0.5 * zooid.phase.fitness_mean
    } else {
        zooid.prod.ok_rate
    }
}

/// Rank `defenders` best-first, breaking ties by name ascending.
pub fn rank(defenders: &[Zooid]) -> Vec<Scored> {
    let mut scored: Vec<Scored> = defenders
        .iter()
        .map(|z| Scored {
            name: z.name.clone(),
            score: composite_score(z),
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    scored
}

/// Split a ranked defender list into the top-`k` winners and the remaining
/// losers ("choosing the top k winners").
pub fn split_winners(ranked: &[Scored], k: u32) -> (Vec<String>, Vec<String>) {
    let k = k as usize;
    let winners = ranked.iter().take(k).map(|s| s.name.clone()).collect();
    let losers = ranked.iter().skip(k).map(|s| s.name.clone()).collect();
    (winners, losers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kloros_core::{GenomeHash, LifecycleState, NicheKey, PhaseSnapshot, PolicyOverrides, ProdSnapshot};

    fn zooid(name: &str, ok_rate: f64) -> Zooid {
        let now = Utc::now();
        Zooid {
            schema_version: "1.0".into(),
            name: name.into(),
            genome_hash: GenomeHash::of(name.as_bytes(), b"pheno"),
            niche: NicheKey::new("queue_management", "latency_monitoring"),
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
        }
    }

    #[test]
    fn ranks_by_score_descending() {
        let defenders = vec![zooid("lm_002", 0.5), zooid("lm_001", 0.9), zooid("lm_003", 0.7)];
        let ranked = rank(&defenders);
        assert_eq!(
            ranked.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["lm_001", "lm_003", "lm_002"]
        );
    }

    #[test]
    fn ties_break_by_name_ascending() {
        let defenders = vec![zooid("lm_b", 0.5), zooid("lm_a", 0.5)];
        let ranked = rank(&defenders);
        assert_eq!(ranked[0].name, "lm_a");
    }

    #[test]
    fn split_respects_k() {
        let defenders = vec![zooid("lm_a", 0.9), zooid("lm_b", 0.8), zooid("lm_c", 0.7)];
        let ranked = rank(&defenders);
        let (winners, losers) = split_winners(&ranked, 2);
        assert_eq!(winners, vec!["lm_a".to_string(), "lm_b".to_string()]);
        assert_eq!(losers, vec!["lm_c".to_string()]);
    }
}
