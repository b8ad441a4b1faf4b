//! `Scanner`: the trait each introspection analyzer implements, driven by
//! `ScannerRunner` on scheduler triggers with a hard per-scan timeout and
//! fingerprint-based deduplication of repeat findings.
//! Grounded on `knhk-autonomic::monitor::MonitoringComponent`'s
//! collect-metrics-then-detect-anomalies split, generalized from one
//! built-in monitor to any number of small structs implementing a shared
//! trait.

use crate::cache::ObservationCache;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kloros_bus::{signals, ChemBus, Envelope, Facts, SignalHandler};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{instrument, warn};

/// Hard per-scan timeout, default 30s.
pub const DEFAULT_SCAN_TIMEOUT_SEC: u64 = 30;
/// Default fingerprint dedup TTL, operator-configurable.
pub const DEFAULT_DEDUP_TTL_SEC: i64 = 3600;

/// One capability gap, bottleneck, or similar finding surfaced by a scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub finding_type: String,
    pub daemon: String,
    pub issue: String,
    #[serde(default)]
    pub detail: Facts,
}

impl Finding {
    /// Stable identity for deduplication: a fingerprint over
    /// `{finding_type, daemon, issue}`, hashed.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.finding_type.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.daemon.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.issue.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// An on-demand analyzer over the shared observation cache.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Short identifying name, used in logs and this scanner's own
    /// crash-isolation observation.
    fn name(&self) -> &str;

    /// Read whatever slice of the shared cache this scanner cares about.
    async fn observe(&self, cache: &ObservationCache) -> Vec<Envelope>;

    /// Turn observed envelopes into zero or more findings.
    async fn evaluate(&self, observed: &[Envelope]) -> Vec<Finding>;
}

struct Dedup {
    ttl: ChronoDuration,
    last_emitted: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Dedup {
    fn new(ttl_sec: i64) -> Self {
        Self {
            ttl: ChronoDuration::seconds(ttl_sec),
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    fn should_emit(&self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        let mut seen = self.last_emitted.lock().unwrap();
        let emit = match seen.get(fingerprint) {
            Some(last) => now - *last >= self.ttl,
            None => true,
        };
        if emit {
            seen.insert(fingerprint.to_string(), now);
        }
        emit
    }
}

/// Drives every registered `Scanner` on each scheduler trigger, isolating
/// failures (a scanner that exceeds its timeout is abandoned, its own
/// failure emitted as an `OBSERVATION`, rather than taking the whole
/// introspection component down) and deduplicating repeat findings by
/// fingerprint.
pub struct ScannerRunner {
    bus: Arc<ChemBus>,
    cache: Arc<ObservationCache>,
    scanners: Vec<Arc<dyn Scanner>>,
    dedup: Dedup,
    scan_timeout: Duration,
}

impl ScannerRunner {
    /// Build a runner with the design-default timeout and dedup TTL.
    pub fn new(cache: Arc<ObservationCache>, bus: Arc<ChemBus>, scanners: Vec<Arc<dyn Scanner>>) -> Self {
        Self::with_options(cache, bus, scanners, DEFAULT_SCAN_TIMEOUT_SEC, DEFAULT_DEDUP_TTL_SEC)
    }

    /// Build a runner with explicit timeout/TTL overrides, for tests and
    /// tuned deployments.
    pub fn with_options(
        cache: Arc<ObservationCache>,
        bus: Arc<ChemBus>,
        scanners: Vec<Arc<dyn Scanner>>,
        scan_timeout_sec: u64,
        dedup_ttl_sec: i64,
    ) -> Self {
        Self {
            bus,
            cache,
            scanners,
            dedup: Dedup::new(dedup_ttl_sec),
            scan_timeout: Duration::from_secs(scan_timeout_sec),
        }
    }

    /// Run every registered scanner once, emitting `CAPABILITY_GAP_FOUND`
    /// for each fresh finding. Scanners run independently; one exceeding its
    /// timeout does not block or fail the others.
    #[instrument(skip(self))]
    pub async fn run_all(&self) -> Result<usize> {
        let mut emitted = 0;
        for scanner in &self.scanners {
            emitted += self.run_one(scanner).await?;
        }
        Ok(emitted)
    }

    async fn run_one(&self, scanner: &Arc<dyn Scanner>) -> Result<usize> {
        let cache = Arc::clone(&self.cache);
        let scanner_inner = Arc::clone(scanner);
        let scan = async move {
            let observed = scanner_inner.observe(&cache).await;
            scanner_inner.evaluate(&observed).await
        };

        let findings = match timeout(self.scan_timeout, scan).await {
            Ok(findings) => findings,
            Err(_) => {
                warn!(scanner = scanner.name(), "scanner exceeded its scan timeout");
                let mut facts = Facts::new();
                facts.insert("zooid".into(), Value::String(scanner.name().to_string()));
                facts.insert("ok".into(), Value::from(false));
                facts.insert("reason".into(), Value::String("scan_timeout".into()));
                self.bus
                    .emit(signals::OBSERVATION, "", 1.0, facts, "introspection")
                    .await?;
                return Ok(0);
            }
        };

        let now = Utc::now();
        let mut emitted = 0;
        for finding in findings {
            let fingerprint = finding.fingerprint();
            if !self.dedup.should_emit(&fingerprint, now) {
                continue;
            }
            let mut facts = Facts::new();
            facts.insert("type".into(), Value::String(finding.finding_type.clone()));
            facts.insert("daemon".into(), Value::String(finding.daemon.clone()));
            facts.insert("issue".into(), Value::String(finding.issue.clone()));
            facts.insert("fingerprint".into(), Value::String(fingerprint));
            for (key, value) in finding.detail {
                facts.insert(key, value);
            }
            self.bus
                .emit(signals::CAPABILITY_GAP_FOUND, "", 1.0, facts, scanner.name())
                .await?;
            emitted += 1;
        }
        Ok(emitted)
    }
}

#[async_trait]
impl SignalHandler for ScannerRunner {
    async fn handle(&self, envelope: &Envelope) -> std::result::Result<(), String> {
        if !envelope.signal.starts_with(signals::TRIGGER_PREFIX) {
            return Ok(());
        }
        self.run_all().await.map_err(|err| err.to_string())?;
        Ok(())
    }
}
