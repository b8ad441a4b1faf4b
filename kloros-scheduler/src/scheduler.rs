//! The Scheduler: drives every named entry in `lifecycle_policy.toml`'s
//! schedule table on its own wall-clock cadence, adapting non-critical
//! intervals to affective load and emitting a 1Hz heartbeat.
//! The tick loop follows `AutonomicController::start`'s self-paced cycle
//! shape, generalized from one fixed-frequency MAPE-K loop to N
//! independently-configured named schedules checked against wall-clock
//! due times every second, rather than accumulated deltas (//! "Drift avoidance").

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kloros_bus::{signals, ChemBus, Envelope, Facts, SignalHandler};
use kloros_config::{LifecyclePolicyConfig, ScheduleEntry};
use rand::Rng;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::time::Duration;
use tracing::{info, instrument};

/// Fatigue multiplier applied to adaptive schedules' intervals on
/// `AFFECT_CRITICAL_FATIGUE` ("e.g., ×2").
pub const DEFAULT_FATIGUE_FACTOR: f64 = 2.0;
/// Wellbeing multiplier applied to adaptive schedules' intervals on
/// `AFFECT_WELLBEING_HIGH` ("e.g., ×0.67").
pub const DEFAULT_WELLBEING_FACTOR: f64 = 0.67;
/// Bounds the cumulative multiplier can drift to under repeated affective
/// signals, so a run of fatigue events can't stall a schedule indefinitely
/// and a run of wellbeing events can't collapse it to a busy-loop.
const MIN_MULTIPLIER: f64 = 0.25;
const MAX_MULTIPLIER: f64 = 4.0;
/// Upper bound of the uniform jitter applied to each computed interval
/// ("0-5% of interval").
const MAX_JITTER_FRACTION: f64 = 0.05;
/// Consecutive emission failures on one schedule before it is disabled;
/// repeated failures to emit a topic disable that topic after this many
/// tries.
const EMIT_FAILURE_DISABLE_THRESHOLD: u32 = 5;

/// Compute the effective interval for one schedule entry under the current
/// adaptive multiplier, honoring the critical-priority floor: critical
/// schedules are never slowed beyond their configured floor.
fn effective_interval_sec(entry: &ScheduleEntry, multiplier: f64) -> u64 {
    let scaled = if entry.adaptive {
        ((entry.interval_sec as f64) * multiplier).round().max(1.0) as u64
    } else {
        entry.interval_sec
    };
    if entry.critical {
        scaled.max(entry.floor_sec)
    } else {
        scaled.max(1)
    }
}

fn next_due(now: DateTime<Utc>, interval_sec: u64) -> DateTime<Utc> {
    let jitter_fraction = rand::thread_rng().gen_range(0.0..=MAX_JITTER_FRACTION);
    let millis = (interval_sec as f64) * (1.0 + jitter_fraction) * 1000.0;
    now + chrono::Duration::milliseconds(millis.round() as i64)
}

/// Drives the named-schedule table over the bus.
pub struct Scheduler {
    bus: Arc<ChemBus>,
    schedules: BTreeMap<String, ScheduleEntry>,
    fatigue_factor: f64,
    wellbeing_factor: f64,
    multiplier: RwLock<f64>,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    /// Construct a scheduler over `policy.schedules`, using spec-default
    /// fatigue/wellbeing factors.
    pub fn new(bus: Arc<ChemBus>, policy: &LifecyclePolicyConfig) -> Arc<Self> {
        Self::with_factors(bus, policy.schedules.clone(), DEFAULT_FATIGUE_FACTOR, DEFAULT_WELLBEING_FACTOR)
    }

    /// Construct a scheduler with explicit affective-load factors, for tests
    /// and tuned deployments.
    pub fn with_factors(
        bus: Arc<ChemBus>,
        schedules: BTreeMap<String, ScheduleEntry>,
        fatigue_factor: f64,
        wellbeing_factor: f64,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            schedules,
            fatigue_factor,
            wellbeing_factor,
            multiplier: RwLock::new(1.0),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// The current adaptive multiplier, for observability and tests.
    pub fn current_multiplier(&self) -> f64 {
        *self.multiplier.read().unwrap()
    }

    /// Stop the tick loop after its current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn apply_factor(&self, factor: f64) {
        let mut multiplier = self.multiplier.write().unwrap();
        *multiplier = (*multiplier * factor).clamp(MIN_MULTIPLIER, MAX_MULTIPLIER);
    }

    /// Run the 1Hz tick loop until `stop` is called. Each second: emit
    /// `Q_SCHEDULE_TICK`, then emit every schedule whose wall-clock due time
    /// has arrived, recomputing its next due time with jitter.
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) {
        let start = Utc::now();
        let mut due: HashMap<String, DateTime<Utc>> =
            self.schedules.keys().map(|name| (name.clone(), start)).collect();
        let mut consecutive_failures: HashMap<String, u32> = HashMap::new();
        let mut disabled: std::collections::HashSet<String> = std::collections::HashSet::new();

        let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
        info!(schedules = self.schedules.len(), "scheduler tick loop starting");

        while self.running.load(Ordering::SeqCst) {
            heartbeat.tick().await;
            let now = Utc::now();
            let _ = self.bus.emit(signals::SCHEDULE_TICK, "", 1.0, Facts::new(), "scheduler").await;

            for (name, entry) in &self.schedules {
                if disabled.contains(name) {
                    continue;
                }
                let slot = due.entry(name.clone()).or_insert(now);
                if *slot > now {
                    continue;
                }
                let mut facts = Facts::new();
                facts.insert("schedule".into(), Value::String(name.clone()));
                match self
                    .bus
                    .emit(entry.signal.clone(), entry.ecosystem.clone(), 1.0, facts, "scheduler")
                    .await
                {
                    Ok(()) => {
                        consecutive_failures.insert(name.clone(), 0);
                    }
                    Err(err) => {
                        let failures = consecutive_failures.entry(name.clone()).or_insert(0);
                        *failures += 1;
                        tracing::warn!(schedule = %name, error = %err, consecutive_failures = *failures, "schedule emission failed");
                        if *failures >= EMIT_FAILURE_DISABLE_THRESHOLD {
                            tracing::error!(schedule = %name, "schedule disabled after repeated emission failures");
                            disabled.insert(name.clone());
                            continue;
                        }
                    }
                }

                let multiplier = self.current_multiplier();
                let interval_sec = effective_interval_sec(entry, multiplier);
                *slot = next_due(now, interval_sec);
            }
        }
        info!("scheduler tick loop stopped");
    }
}

#[async_trait]
impl SignalHandler for Scheduler {
    async fn handle(&self, envelope: &Envelope) -> std::result::Result<(), String> {
        match envelope.signal.as_str() {
            s if s == signals::AFFECT_CRITICAL_FATIGUE => {
                self.apply_factor(self.fatigue_factor);
                Ok(())
            }
            s if s == signals::AFFECT_WELLBEING_HIGH => {
                self.apply_factor(self.wellbeing_factor);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
