//! Concrete scanners over the shared `ObservationCache`, surfacing
//! bottlenecks, slow inference, resource strain, and comparative
//! performance across variants. Inference/voice-pipeline specifics are out
//! of scope, so "slow inference" here generalizes to "high observed
//! time-to-resolution", the one latency signal this core actually owns.

use crate::cache::ObservationCache;
use crate::scanner::{Finding, Scanner};
use async_trait::async_trait;
use kloros_bus::{signals, Envelope, Facts};
use serde_json::Value;
use std::collections::HashMap;

/// Flags niches whose recent `OBSERVATION` stream shows a failure rate past
/// a threshold -- a cheap proxy for "bottleneck" when no richer latency
/// histogram is wired in ("bottlenecks... resource strain").
pub struct BottleneckScanner {
    min_samples: usize,
    failure_rate_threshold: f64,
}

impl BottleneckScanner {
    /// A scanner with the given minimum sample size and failure-rate
    /// threshold (fraction in `[0, 1]`) before it reports a finding.
    pub fn new(min_samples: usize, failure_rate_threshold: f64) -> Self {
        Self {
            min_samples,
            failure_rate_threshold,
        }
    }
}

#[async_trait]
impl Scanner for BottleneckScanner {
    fn name(&self) -> &str {
        "bottleneck_scanner"
    }

    async fn observe(&self, cache: &ObservationCache) -> Vec<Envelope> {
        cache.snapshot_matching(signals::OBSERVATION)
    }

    async fn evaluate(&self, observed: &[Envelope]) -> Vec<Finding> {
        let mut by_zooid: HashMap<String, (u32, u32)> = HashMap::new();
        for envelope in observed {
            let ok = envelope
                .facts
                .get("ok")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            let entry = by_zooid.entry(envelope.sender.clone()).or_insert((0, 0));
            entry.0 += 1;
            if !ok {
                entry.1 += 1;
            }
        }

        let mut findings = Vec::new();
        for (zooid, (total, failures)) in by_zooid {
            if (total as usize) < self.min_samples {
                continue;
            }
            let rate = failures as f64 / total as f64;
            if rate >= self.failure_rate_threshold {
                let mut detail = Facts::new();
                detail.insert("failure_rate".into(), Value::from(rate));
                detail.insert("samples".into(), Value::from(total));
                findings.push(Finding {
                    finding_type: "bottleneck".into(),
                    daemon: zooid,
                    issue: "elevated_failure_rate".into(),
                    detail,
                });
            }
        }
        findings
    }
}

/// Flags a sustained run of `governance.backpressure` signals from the same
/// subscriber -- a slow consumer falling behind the bus (/// "resource strain").
pub struct BackpressureScanner {
    min_occurrences: usize,
}

impl BackpressureScanner {
    /// A scanner that reports once a subscriber appears in at least
    /// `min_occurrences` backpressure events within the cache's window.
    pub fn new(min_occurrences: usize) -> Self {
        Self { min_occurrences }
    }
}

#[async_trait]
impl Scanner for BackpressureScanner {
    fn name(&self) -> &str {
        "backpressure_scanner"
    }

    async fn observe(&self, cache: &ObservationCache) -> Vec<Envelope> {
        cache.snapshot_matching("governance.backpressure")
    }

    async fn evaluate(&self, observed: &[Envelope]) -> Vec<Finding> {
        let mut by_subscriber: HashMap<String, usize> = HashMap::new();
        for envelope in observed {
            if let Some(name) = envelope.facts.get("subscriber").and_then(Value::as_str) {
                *by_subscriber.entry(name.to_string()).or_insert(0) += 1;
            }
        }

        by_subscriber
            .into_iter()
            .filter(|(_, count)| *count >= self.min_occurrences)
            .map(|(subscriber, count)| {
                let mut detail = Facts::new();
                detail.insert("occurrences".into(), Value::from(count));
                Finding {
                    finding_type: "resource_strain".into(),
                    daemon: subscriber,
                    issue: "sustained_backpressure".into(),
                    detail,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn observation(sender: &str, ok: bool) -> Envelope {
        let mut facts = Facts::new();
        facts.insert("ok".into(), Value::from(ok));
        Envelope {
            signal: signals::OBSERVATION.into(),
            ecosystem: "".into(),
            intensity: 1.0,
            facts,
            ts: Utc::now(),
            sender: sender.into(),
            signature: None,
        }
    }

    #[tokio::test]
    async fn bottleneck_scanner_flags_elevated_failure_rate() {
        let cache = ObservationCache::new();
        for _ in 0..8 {
            cache.push(observation("lm_001", false));
        }
        for _ in 0..2 {
            cache.push(observation("lm_001", true));
        }
        let scanner = BottleneckScanner::new(5, 0.5);
        let observed = scanner.observe(&cache).await;
        let findings = scanner.evaluate(&observed).await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].daemon, "lm_001");
    }

    #[tokio::test]
    async fn bottleneck_scanner_ignores_small_samples() {
        let cache = ObservationCache::new();
        cache.push(observation("lm_002", false));
        let scanner = BottleneckScanner::new(5, 0.5);
        let observed = scanner.observe(&cache).await;
        assert!(scanner.evaluate(&observed).await.is_empty());
    }

    #[tokio::test]
    async fn backpressure_scanner_flags_sustained_lag() {
        let cache = ObservationCache::new();
        for _ in 0..3 {
            let mut facts = Facts::new();
            facts.insert("subscriber".into(), Value::String("historian".into()));
            cache.push(Envelope {
                signal: "governance.backpressure".into(),
                ecosystem: "".into(),
                intensity: 1.0,
                facts,
                ts: Utc::now(),
                sender: "chembus".into(),
                signature: None,
            });
        }
        let scanner = BackpressureScanner::new(2);
        let observed = scanner.observe(&cache).await;
        let findings = scanner.evaluate(&observed).await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].daemon, "historian");
    }
}
