//! `ObservationCache`: a shared, bounded window of recent bus traffic that
//! every scanner reads from instead of each holding its own subscription
//!.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kloros_bus::{Envelope, SignalHandler};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default window size in messages ("bounded by message count
/// and age").
pub const DEFAULT_MAX_MESSAGES: usize = 10_000;
/// Default window age in seconds.
pub const DEFAULT_MAX_AGE_SEC: i64 = 3600;

struct CachedEnvelope {
    envelope: Envelope,
    received_at: DateTime<Utc>,
}

/// An in-memory rolling window of recent bus traffic, bounded by both
/// message count and age.
pub struct ObservationCache {
    max_messages: usize,
    max_age: ChronoDuration,
    window: Mutex<VecDeque<CachedEnvelope>>,
}

impl ObservationCache {
    /// A cache with the design-default bounds.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_MESSAGES, DEFAULT_MAX_AGE_SEC)
    }

    /// A cache with explicit bounds, for tests and tuned deployments.
    pub fn with_limits(max_messages: usize, max_age_sec: i64) -> Self {
        Self {
            max_messages,
            max_age: ChronoDuration::seconds(max_age_sec),
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one envelope, evicting anything past the count or age bound.
    pub fn push(&self, envelope: Envelope) {
        let now = Utc::now();
        let mut window = self.window.lock().unwrap();
        window.push_back(CachedEnvelope {
            envelope,
            received_at: now,
        });
        while window.len() > self.max_messages {
            window.pop_front();
        }
        while window
            .front()
            .map(|c| now - c.received_at > self.max_age)
            .unwrap_or(false)
        {
            window.pop_front();
        }
    }

    /// A snapshot of every envelope currently inside the window.
    pub fn snapshot(&self) -> Vec<Envelope> {
        self.window.lock().unwrap().iter().map(|c| c.envelope.clone()).collect()
    }

    /// A snapshot restricted to one signal label.
    pub fn snapshot_matching(&self, signal: &str) -> Vec<Envelope> {
        self.window
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.envelope.signal == signal)
            .map(|c| c.envelope.clone())
            .collect()
    }

    /// Number of envelopes currently inside the window.
    pub fn len(&self) -> usize {
        self.window.lock().unwrap().len()
    }

    /// Whether the window is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObservationCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalHandler for ObservationCache {
    async fn handle(&self, envelope: &Envelope) -> std::result::Result<(), String> {
        self.push(envelope.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kloros_bus::Facts;

    fn envelope(signal: &str) -> Envelope {
        Envelope {
            signal: signal.to_string(),
            ecosystem: "".into(),
            intensity: 1.0,
            facts: Facts::new(),
            ts: Utc::now(),
            sender: "zooid".into(),
            signature: None,
        }
    }

    #[test]
    fn push_and_snapshot_preserve_order() {
        let cache = ObservationCache::new();
        cache.push(envelope("HEARTBEAT"));
        cache.push(envelope("OBSERVATION"));
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].signal, "HEARTBEAT");
        assert_eq!(snapshot[1].signal, "OBSERVATION");
    }

    #[test]
    fn message_count_bound_evicts_oldest() {
        let cache = ObservationCache::with_limits(2, DEFAULT_MAX_AGE_SEC);
        cache.push(envelope("A"));
        cache.push(envelope("B"));
        cache.push(envelope("C"));
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].signal, "B");
        assert_eq!(snapshot[1].signal, "C");
    }

    #[test]
    fn age_bound_evicts_stale_entries() {
        let cache = ObservationCache::with_limits(DEFAULT_MAX_MESSAGES, 0);
        cache.push(envelope("STALE"));
        std::thread::sleep(std::time::Duration::from_millis(5));
        cache.push(envelope("FRESH"));
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].signal, "FRESH");
    }

    #[test]
    fn snapshot_matching_filters_by_signal() {
        let cache = ObservationCache::new();
        cache.push(envelope("HEARTBEAT"));
        cache.push(envelope("OBSERVATION"));
        cache.push(envelope("OBSERVATION"));
        assert_eq!(cache.snapshot_matching("OBSERVATION").len(), 2);
    }
}
