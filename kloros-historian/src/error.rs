//! Historian errors.

use thiserror::Error;

/// Result type for `kloros-historian` operations.
pub type Result<T> = std::result::Result<T, HistorianError>;

/// Errors raised persisting or consolidating bus-history segments.
#[derive(Error, Debug)]
pub enum HistorianError {
    /// A segment file read, write, or rotate failed.
    #[error("history segment I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A history record failed to (de)serialize.
    #[error("history record (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Appending a consolidated record to episodic storage failed.
    #[error("episodic ledger error: {0}")]
    Ledger(#[from] kloros_ledger::LedgerError),
}
