//! The message envelope carried by every bus emission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Structured key/value payload attached to an emission. Values are scalars,
/// small lists, or nested records, so a JSON value map is the natural fit.
pub type Facts = BTreeMap<String, Value>;

/// One message on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Short ASCII label, e.g. `OBSERVATION`, `HEARTBEAT`, `governance.quarantine`.
    pub signal: String,
    /// Ecosystem the emission concerns, or empty for bus-internal signals.
    pub ecosystem: String,
    /// Non-negative weighting used for rate-limiting and scanning priority.
    pub intensity: f64,
    /// Structured payload.
    pub facts: Facts,
    /// Emission timestamp.
    pub ts: DateTime<Utc>,
    /// Publisher name.
    pub sender: String,
    /// HMAC signature over the canonicalized facts, present on `OBSERVATION`.
    #[serde(default)]
    pub signature: Option<String>,
}

impl Envelope {
    /// Whether `signal` matches a given subscription prefix (empty prefix
    /// subscribes to everything).
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        prefix.is_empty() || self.signal.starts_with(prefix)
    }
}
