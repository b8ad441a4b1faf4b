//! The Historian: persists all bus traffic to rotating segment files and
//! periodically consolidates old segments into summarized episodic records
//!.

pub mod consolidation;
pub mod error;
pub mod historian;

pub use consolidation::{
    ConsolidatedRecord, Consolidator, DEFAULT_CUTOFF_HOURS, DEFAULT_PRESERVE_SIGNALS,
};
pub use error::{HistorianError, Result};
pub use historian::{segment_start, Historian, HistoryRecord, DEFAULT_SOFT_CAP_BYTES};
