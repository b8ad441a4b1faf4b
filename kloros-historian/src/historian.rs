//! The Historian: the universal (match-all) subscriber that persists every
//! bus message to a rotating set of newline-delimited segment files, so
//! consolidation can later treat "segment older than cutoff" as a
//! file-level concept rather than a sled key range (; generalized
//! from `LockchainStorage`'s append/flush discipline).

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kloros_bus::{signals, ChemBus, Envelope, Facts, SignalHandler};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Soft size cap on the active segment before an emergency rotation,
/// default 500MB.
pub const DEFAULT_SOFT_CAP_BYTES: u64 = 500 * 1024 * 1024;

const CURRENT_SEGMENT_NAME: &str = "current.log";

/// One received-and-stamped bus message, as persisted to a segment file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub envelope: Envelope,
    pub received_at: DateTime<Utc>,
}

struct ActiveSegment {
    file: File,
    bytes_written: u64,
    started_at: DateTime<Utc>,
}

/// Appends every message it receives to a rotating set of segment files
/// under `dir`.
pub struct Historian {
    dir: PathBuf,
    soft_cap_bytes: u64,
    active: Mutex<ActiveSegment>,
    bus: Arc<ChemBus>,
}

impl Historian {
    /// Open (or create) the history directory and its active segment, with
    /// the design-default soft cap.
    pub async fn open(dir: impl AsRef<Path>, bus: Arc<ChemBus>) -> Result<Arc<Self>> {
        Self::with_cap(dir, bus, DEFAULT_SOFT_CAP_BYTES).await
    }

    /// Open with an explicit soft size cap, for tests and tuned deployments.
    pub async fn with_cap(dir: impl AsRef<Path>, bus: Arc<ChemBus>, soft_cap_bytes: u64) -> Result<Arc<Self>> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        let active = Self::open_segment(&dir).await?;
        Ok(Arc::new(Self {
            dir,
            soft_cap_bytes,
            active: Mutex::new(active),
            bus,
        }))
    }

    async fn open_segment(dir: &Path) -> Result<ActiveSegment> {
        let path = dir.join(CURRENT_SEGMENT_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        let bytes_written = file.metadata().await?.len();
        Ok(ActiveSegment {
            file,
            bytes_written,
            started_at: Utc::now(),
        })
    }

    /// Directory holding the active and closed segment files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one received envelope, rotating the active segment if the
    /// soft cap is exceeded afterward.
    #[instrument(skip(self, envelope))]
    pub async fn record(&self, envelope: &Envelope) -> Result<()> {
        let record = HistoryRecord {
            envelope: envelope.clone(),
            received_at: Utc::now(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut active = self.active.lock().await;
        active.file.write_all(&line).await?;
        active.file.flush().await?;
        active.bytes_written += line.len() as u64;

        if active.bytes_written >= self.soft_cap_bytes {
            self.rotate_locked(&mut active).await?;
        }
        Ok(())
    }

    /// Close the active segment and start a fresh one, returning the path
    /// the closed segment was archived to. Used both for the size-cap
    /// emergency path and by consolidation, which always rotates first so
    /// it never reads a segment still being appended to.
    pub async fn rotate(&self) -> Result<PathBuf> {
        let mut active = self.active.lock().await;
        self.rotate_locked(&mut active).await
    }

    async fn rotate_locked(&self, active: &mut ActiveSegment) -> Result<PathBuf> {
        active.file.flush().await?;
        let archived_name = format!("segment-{:020}.log", active.started_at.timestamp_millis().max(0));
        let archived_path = self.dir.join(&archived_name);
        let current_path = self.dir.join(CURRENT_SEGMENT_NAME);

        if active.bytes_written == 0 {
            // Nothing written to the active segment yet; no point archiving
            // an empty file or resetting its start timestamp.
            return Ok(archived_path);
        }
        fs::rename(&current_path, &archived_path).await?;

        let fresh = Self::open_segment(&self.dir).await?;
        let bytes = active.bytes_written;
        *active = fresh;

        let mut facts = Facts::new();
        facts.insert("bytes".into(), Value::from(bytes));
        facts.insert("segment".into(), Value::String(archived_name));
        let _ = self.bus.emit(signals::HISTORY_ROTATED, "", 1.0, facts, "historian").await;
        info!(bytes, "bus history segment rotated");
        Ok(archived_path)
    }

    /// All closed segment files (excludes the active `current.log`), sorted
    /// oldest first by the timestamp embedded in their filename.
    pub async fn closed_segments(&self) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let is_segment = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("segment-"))
                .unwrap_or(false);
            if is_segment {
                entries.push(path);
            }
        }
        entries.sort();
        Ok(entries)
    }
}

#[async_trait]
impl SignalHandler for Historian {
    async fn handle(&self, envelope: &Envelope) -> std::result::Result<(), String> {
        self.record(envelope).await.map_err(|err| {
            warn!(error = %err, "historian failed to persist message");
            err.to_string()
        })
    }
}

/// Parse a closed segment's embedded start timestamp from its filename.
pub fn segment_start(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    let ts: i64 = stem.strip_prefix("segment-")?.parse().ok()?;
    DateTime::from_timestamp_millis(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_appends_a_json_line_to_the_active_segment() {
        let dir = tempfile::tempdir().unwrap();
        let bus = ChemBus::new();
        let historian = Historian::open(dir.path(), bus).await.unwrap();

        let envelope = Envelope {
            signal: "HEARTBEAT".into(),
            ecosystem: "latency_monitoring".into(),
            intensity: 1.0,
            facts: Facts::new(),
            ts: Utc::now(),
            sender: "lm_001".into(),
            signature: None,
        };
        historian.record(&envelope).await.unwrap();

        let contents = fs::read_to_string(dir.path().join(CURRENT_SEGMENT_NAME)).await.unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: HistoryRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.envelope.signal, "HEARTBEAT");
    }

    #[tokio::test]
    async fn exceeding_the_soft_cap_rotates_and_emits_history_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let bus = ChemBus::new();
        let rotated = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        struct CountingHandler(Arc<std::sync::atomic::AtomicUsize>);
        #[async_trait::async_trait]
        impl SignalHandler for CountingHandler {
            async fn handle(&self, _e: &Envelope) -> std::result::Result<(), String> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        }
        bus.subscribe(
            signals::HISTORY_ROTATED,
            "rotation_counter",
            None,
            Arc::new(CountingHandler(rotated.clone())),
        )
        .await
        .unwrap();

        let historian = Historian::with_cap(dir.path(), bus, 32).await.unwrap();
        let envelope = Envelope {
            signal: "HEARTBEAT".into(),
            ecosystem: "".into(),
            intensity: 1.0,
            facts: Facts::new(),
            ts: Utc::now(),
            sender: "zooid".into(),
            signature: None,
        };
        for _ in 0..5 {
            historian.record(&envelope).await.unwrap();
        }

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let closed = historian.closed_segments().await.unwrap();
        assert!(!closed.is_empty());
        assert!(rotated.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn rotate_on_an_empty_segment_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let bus = ChemBus::new();
        let historian = Historian::open(dir.path(), bus).await.unwrap();
        historian.rotate().await.unwrap();
        assert!(historian.closed_segments().await.unwrap().is_empty());
        assert!(fs::metadata(dir.path().join(CURRENT_SEGMENT_NAME)).await.is_ok());
    }
}
