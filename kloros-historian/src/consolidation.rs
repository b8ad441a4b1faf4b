//! Consolidation: periodically compacts closed bus-history segments into a
//! summarized episodic record, preserving high-value signals verbatim
//!.

use crate::error::Result;
use crate::historian::{segment_start, Historian, HistoryRecord};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kloros_bus::{signals, ChemBus, Envelope, Facts};
use kloros_ledger::LedgerStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, instrument, warn};

/// Signals preserved verbatim in the consolidated record rather than being
/// folded into counts alone.
pub const DEFAULT_PRESERVE_SIGNALS: &[&str] = &[
    signals::CAPABILITY_GAP_FOUND,
    "BOTTLENECK_DETECTED",
    signals::QUARANTINE_TRIPPED,
    signals::ROLLBACK_NO_HEARTBEAT,
    signals::CATASTROPHIC_RULE_MISSING,
];

/// Default age at which a closed segment becomes eligible for consolidation
/// ("default 24h").
pub const DEFAULT_CUTOFF_HOURS: i64 = 24;

/// One compacted summary of a consolidated segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedRecord {
    pub segment: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub message_count: usize,
    pub counts_by_signal: BTreeMap<String, usize>,
    pub active_senders: Vec<String>,
    pub preserved: Vec<Envelope>,
}

/// Reads closed segments older than `cutoff`, summarizes and archives each
/// exactly once, and prunes the raw file only after the compacted record is
/// durably written ("failure must not prune raw data").
pub struct Consolidator {
    historian: Arc<Historian>,
    episodic: Arc<LedgerStore<ConsolidatedRecord>>,
    bus: Arc<ChemBus>,
    cutoff: ChronoDuration,
    preserve: Vec<String>,
}

impl Consolidator {
    /// Build a consolidator with the design-default cutoff and preserve set.
    pub fn new(
        historian: Arc<Historian>,
        episodic: Arc<LedgerStore<ConsolidatedRecord>>,
        bus: Arc<ChemBus>,
    ) -> Self {
        Self::with_options(
            historian,
            episodic,
            bus,
            ChronoDuration::hours(DEFAULT_CUTOFF_HOURS),
            DEFAULT_PRESERVE_SIGNALS.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Build a consolidator with explicit cutoff/preserve-set overrides, for
    /// tests and tuned deployments.
    pub fn with_options(
        historian: Arc<Historian>,
        episodic: Arc<LedgerStore<ConsolidatedRecord>>,
        bus: Arc<ChemBus>,
        cutoff: ChronoDuration,
        preserve: Vec<String>,
    ) -> Self {
        Self {
            historian,
            episodic,
            bus,
            cutoff,
            preserve,
        }
    }

    /// Run one consolidation pass: close out the active segment so it is
    /// never read mid-write, then consolidate every closed segment whose
    /// embedded start timestamp is older than the cutoff. Already-consolidated
    /// segments (their raw file already pruned) are simply absent from the
    /// next listing, which is what makes repeated runs over the same window
    /// idempotent.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<usize> {
        let _ = self.historian.rotate().await;
        let now = Utc::now();
        let segments = self.historian.closed_segments().await?;
        let mut consolidated = 0;

        for path in segments {
            let Some(started_at) = segment_start(&path) else {
                warn!(path = %path.display(), "skipping segment with unparseable start timestamp");
                continue;
            };
            if now - started_at < self.cutoff {
                continue;
            }
            if self.consolidate_segment(&path, started_at).await? {
                consolidated += 1;
            }
        }
        Ok(consolidated)
    }

    async fn consolidate_segment(&self, path: &Path, started_at: DateTime<Utc>) -> Result<bool> {
        let file = match fs::File::open(path).await {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let mut message_count = 0usize;
        let mut counts_by_signal: BTreeMap<String, usize> = BTreeMap::new();
        let mut senders: BTreeSet<String> = BTreeSet::new();
        let mut preserved = Vec::new();
        let mut window_end = started_at;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: HistoryRecord = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unparseable history line");
                    continue;
                }
            };
            message_count += 1;
            *counts_by_signal.entry(record.envelope.signal.clone()).or_insert(0) += 1;
            senders.insert(record.envelope.sender.clone());
            if record.received_at > window_end {
                window_end = record.received_at;
            }
            if self.preserve.iter().any(|p| *p == record.envelope.signal) {
                preserved.push(record.envelope);
            }
        }

        let segment_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let summary = ConsolidatedRecord {
            segment: segment_name.clone(),
            window_start: started_at,
            window_end,
            message_count,
            counts_by_signal,
            active_senders: senders.into_iter().collect(),
            preserved,
        };

        // Append before pruning: a failed append leaves the raw segment in
        // place for the next consolidation pass to retry.
        self.episodic.append(started_at.timestamp_millis(), &summary)?;
        fs::remove_file(path).await?;

        let mut facts = Facts::new();
        facts.insert("segment".into(), Value::String(segment_name));
        facts.insert("message_count".into(), Value::from(message_count));
        let _ = self.bus.emit(signals::HISTORY_CONSOLIDATED, "", 1.0, facts, "historian").await;
        info!(messages = message_count, "bus history segment consolidated");
        Ok(true)
    }
}
