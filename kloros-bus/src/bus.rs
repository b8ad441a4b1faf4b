//! ChemBus: the in-process pub/sub signal bus.

use crate::envelope::{Envelope, Facts};
use crate::error::{BusError, Result};
use crate::handler::SignalHandler;
use crate::mailbox::PriorityMailbox;
use crate::rate_limit::TokenBucket;
use crate::topic::is_critical;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, instrument, warn};

/// Default bounded queue depth per subscriber.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default per-publisher token bucket rate.
pub const DEFAULT_PUBLISHER_RATE_PER_SEC: f64 = 1000.0;

/// Consecutive handler failures before a subscriber is quarantined for
/// exceeding its error-rate threshold.
pub const DEFAULT_QUARANTINE_THRESHOLD: u32 = 10;

struct Subscriber {
    topic_prefix: String,
    niche: Option<String>,
    mailbox: Arc<PriorityMailbox>,
    quarantined: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

/// The signal bus shared by every component in one host process.
pub struct ChemBus {
    subscribers: RwLock<HashMap<String, Subscriber>>,
    publisher_buckets: RwLock<HashMap<String, TokenBucket>>,
    queue_capacity: usize,
    publisher_rate_per_sec: f64,
    quarantine_threshold: u32,
}

impl ChemBus {
    /// Construct a bus with the design-default queue depth and rate limit.
    pub fn new() -> Arc<Self> {
        Self::with_limits(
            DEFAULT_QUEUE_CAPACITY,
            DEFAULT_PUBLISHER_RATE_PER_SEC,
            DEFAULT_QUARANTINE_THRESHOLD,
        )
    }

    /// Construct a bus with explicit limits, for tests and tuned deployments.
    pub fn with_limits(
        queue_capacity: usize,
        publisher_rate_per_sec: f64,
        quarantine_threshold: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            publisher_buckets: RwLock::new(HashMap::new()),
            queue_capacity,
            publisher_rate_per_sec,
            quarantine_threshold,
        })
    }

    /// Register a handler invoked on every message whose signal starts with
    /// `topic_prefix` (empty prefix subscribes to all traffic, as the
    /// historian does).
    #[instrument(skip_all)]
    pub async fn subscribe(
        self: &Arc<Self>,
        topic_prefix: impl Into<String>,
        name: impl Into<String>,
        niche: Option<String>,
        handler: Arc<dyn SignalHandler>,
    ) -> Result<()> {
        let name = name.into();
        let topic_prefix = topic_prefix.into();
        tracing::debug!(subscriber = %name, prefix = %topic_prefix, "registering subscription");

        {
            let subs = self.subscribers.read().await;
            if subs.contains_key(&name) {
                return Err(BusError::DuplicateSubscription(name));
            }
        }

        let mailbox = Arc::new(PriorityMailbox::new(self.queue_capacity));
        let mailbox_task = Arc::clone(&mailbox);
        let quarantined = Arc::new(AtomicBool::new(false));
        let quarantined_flag = Arc::clone(&quarantined);
        let bus = Arc::clone(self);
        let sub_name = name.clone();
        let threshold = self.quarantine_threshold;

        let task = tokio::spawn(async move {
            let mut consecutive_failures: u32 = 0;
            loop {
                let envelope = mailbox_task.recv().await;
                match handler.handle(&envelope).await {
                    Ok(()) => consecutive_failures = 0,
                    Err(reason) => {
                        consecutive_failures += 1;
                        warn!(
                            subscriber = %sub_name,
                            reason = %reason,
                            consecutive_failures,
                            "subscriber handler failed"
                        );
                        if consecutive_failures >= threshold {
                            quarantined_flag.store(true, Ordering::SeqCst);
                            error!(subscriber = %sub_name, "subscriber quarantined after repeated failures");
                            let mut facts = Facts::new();
                            facts.insert("subscriber".into(), Value::String(sub_name.clone()));
                            facts.insert(
                                "consecutive_failures".into(),
                                Value::from(consecutive_failures),
                            );
                            let _ = bus
                                .emit("governance.subscriber_quarantined", "", 1.0, facts, "chembus")
                                .await;
                            break;
                        }
                    }
                }
            }
        });

        self.subscribers.write().await.insert(
            name,
            Subscriber {
                topic_prefix,
                niche,
                mailbox,
                quarantined,
                task,
            },
        );
        Ok(())
    }

    /// Remove a subscription and stop its dispatch task.
    pub async fn unsubscribe(&self, name: &str) -> Result<()> {
        let mut subs = self.subscribers.write().await;
        match subs.remove(name) {
            Some(sub) => {
                sub.task.abort();
                Ok(())
            }
            None => Err(BusError::SubscriptionNotFound(name.to_string())),
        }
    }

    /// Whether a subscriber has been quarantined for repeated handler failures.
    pub async fn is_quarantined(&self, name: &str) -> bool {
        self.subscribers
            .read()
            .await
            .get(name)
            .map(|s| s.quarantined.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// The niche a subscriber registered with, if any.
    pub async fn subscriber_niche(&self, name: &str) -> Option<String> {
        self.subscribers
            .read()
            .await
            .get(name)
            .and_then(|s| s.niche.clone())
    }

    /// Fire-and-forget emission. Rate-limited per publisher;
    /// excess is silently dropped after a one-time warning. Delivery to
    /// matching subscribers is at-most-once, preserving per-publisher order.
    #[instrument(skip_all)]
    pub async fn emit(
        &self,
        signal: impl Into<String>,
        ecosystem: impl Into<String>,
        intensity: f64,
        facts: Facts,
        sender: impl Into<String>,
    ) -> Result<()> {
        let signal = signal.into();
        let sender = sender.into();
        tracing::trace!(%signal, %sender, "emitting");

        if !self.take_publisher_token(&sender).await {
            return Ok(());
        }

        let envelope = Envelope {
            signal: signal.clone(),
            ecosystem: ecosystem.into(),
            intensity,
            facts,
            ts: Utc::now(),
            sender,
            signature: None,
        };

        let backpressure_events = self.deliver(&envelope).await;

        // Meta-signals never trigger further backpressure reporting, to avoid
        // amplifying congestion into more congestion.
        if !signal.starts_with("governance.") {
            for (name, depth) in backpressure_events {
                let mut bp_facts = Facts::new();
                bp_facts.insert("subscriber".into(), Value::String(name));
                bp_facts.insert("queue_depth".into(), Value::from(depth));
                let bp_envelope = Envelope {
                    signal: "governance.backpressure".to_string(),
                    ecosystem: String::new(),
                    intensity: 1.0,
                    facts: bp_facts,
                    ts: Utc::now(),
                    sender: "chembus".to_string(),
                    signature: None,
                };
                self.deliver(&bp_envelope).await;
            }
        }

        Ok(())
    }

    /// Push one envelope to every matching, non-quarantined subscriber.
    /// Returns the `(subscriber name, queue depth)` pairs that, on a full
    /// mailbox, dropped something to make room -- either a lower-intensity
    /// envelope already queued, or this one, if it wasn't higher-intensity
    /// than everything already there.
    async fn deliver(&self, envelope: &Envelope) -> Vec<(String, usize)> {
        let mut backpressure_events = Vec::new();
        let subs = self.subscribers.read().await;
        let critical = is_critical(&envelope.signal);
        for (name, sub) in subs.iter() {
            if sub.quarantined.load(Ordering::SeqCst) {
                continue;
            }
            if !envelope.matches_prefix(&sub.topic_prefix) {
                continue;
            }
            if let Some(depth) = sub.mailbox.push(envelope.clone(), critical) {
                backpressure_events.push((name.clone(), depth));
            }
        }
        backpressure_events
    }

    async fn take_publisher_token(&self, sender: &str) -> bool {
        let mut buckets = self.publisher_buckets.write().await;
        let bucket = buckets
            .entry(sender.to_string())
            .or_insert_with(|| TokenBucket::new(self.publisher_rate_per_sec));
        if bucket.try_take() {
            true
        } else {
            if !bucket.warned {
                bucket.warned = true;
                warn!(publisher = %sender, "publisher rate limit exceeded, dropping messages");
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Duration;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl SignalHandler for CountingHandler {
        async fn handle(&self, _envelope: &Envelope) -> std::result::Result<(), String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_to_matching_prefix() {
        let bus = ChemBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "OBSERVATION",
            "ledger_writer",
            None,
            Arc::new(CountingHandler {
                count: Arc::clone(&count),
            }),
        )
        .await
        .unwrap();

        bus.emit("OBSERVATION", "queue_management", 1.0, Facts::new(), "zooid_a")
            .await
            .unwrap();
        bus.emit("HEARTBEAT", "queue_management", 1.0, Facts::new(), "zooid_a")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn match_all_prefix_receives_everything() {
        let bus = ChemBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "",
            "historian",
            None,
            Arc::new(CountingHandler {
                count: Arc::clone(&count),
            }),
        )
        .await
        .unwrap();

        bus.emit("OBSERVATION", "", 1.0, Facts::new(), "zooid_a")
            .await
            .unwrap();
        bus.emit("HEARTBEAT", "", 1.0, Facts::new(), "zooid_a")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn duplicate_subscription_name_rejected() {
        let bus = ChemBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler {
            count: Arc::clone(&count),
        });
        bus.subscribe("", "dup", None, handler.clone()).await.unwrap();
        assert!(bus.subscribe("", "dup", None, handler).await.is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = ChemBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "",
            "temp",
            None,
            Arc::new(CountingHandler {
                count: Arc::clone(&count),
            }),
        )
        .await
        .unwrap();
        bus.unsubscribe("temp").await.unwrap();
        bus.emit("HEARTBEAT", "", 1.0, Facts::new(), "zooid_a")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    struct FailingHandler;

    #[async_trait::async_trait]
    impl SignalHandler for FailingHandler {
        async fn handle(&self, _envelope: &Envelope) -> std::result::Result<(), String> {
            Err("boom".to_string())
        }
    }

    #[tokio::test]
    async fn repeated_failures_quarantine_subscriber() {
        let bus = ChemBus::with_limits(DEFAULT_QUEUE_CAPACITY, DEFAULT_PUBLISHER_RATE_PER_SEC, 3);
        bus.subscribe("HEARTBEAT", "flaky", None, Arc::new(FailingHandler))
            .await
            .unwrap();

        for _ in 0..3 {
            bus.emit("HEARTBEAT", "", 1.0, Facts::new(), "zooid_a")
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(bus.is_quarantined("flaky").await);
    }

    #[tokio::test]
    async fn rate_limit_drops_excess_without_erroring() {
        let bus = ChemBus::with_limits(DEFAULT_QUEUE_CAPACITY, 2.0, DEFAULT_QUARANTINE_THRESHOLD);
        for _ in 0..10 {
            bus.emit("HEARTBEAT", "", 1.0, Facts::new(), "noisy_zooid")
                .await
                .unwrap();
        }
    }
}
