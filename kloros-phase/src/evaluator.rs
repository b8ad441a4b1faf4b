//! The PHASE Evaluator: opens a batch of DORMANT candidates into PROBATION,
//! drives each through its niche's configured observation count, recording
//! one `phase_fitness` row per observation, and retires a candidate once
//! `catastrophic_crash_limit` of those observations crash or time out. DEEP
//! windows hold the global coordination lock for their entire batch; LIGHT
//! windows skip the tick outright if the lock is contended.

use crate::driver::WorkloadDriver;
use crate::error::Result;
use chrono::{DateTime, Utc};
use kloros_bus::{signals, ChemBus, Facts};
use kloros_config::{PolicyDefaults, WorkloadProfile};
use kloros_core::{LifecycleState, NicheKey, PhaseFitnessRecord};
use kloros_ledger::{LedgerStore, LifecycleEventLog};
use kloros_lifecycle::Reason;
use kloros_registry::{LockGuard, Registry};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Which coordination discipline a batch runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseWindow {
    /// Blocks for the global coordination lock; full candidate pool.
    Deep,
    /// Skips the tick if the lock is already held; a bounded candidate subset.
    Light,
}

/// What one `run_batch` call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Identifier stamped onto every `phase_fitness` row and zooid this batch touched.
    pub batch_id: String,
    /// Candidates that entered PROBATION this batch.
    pub started: Vec<String>,
    /// Candidates retired for a catastrophic outcome this batch.
    pub catastrophic: Vec<String>,
    /// `true` if a LIGHT window skipped entirely because the lock was contended.
    pub skipped: bool,
}

/// Drives PHASE batches for one niche.
pub struct PhaseEvaluator {
    registry: Arc<Registry>,
    phase_fitness: Arc<LedgerStore<PhaseFitnessRecord>>,
    driver: WorkloadDriver,
    lifecycle_log: Arc<LifecycleEventLog>,
    bus: Arc<ChemBus>,
    lock_path: PathBuf,
}

impl PhaseEvaluator {
    /// Construct an evaluator. `lock_path` is the shared coordination lock
    /// file (`state_root/locks/phase_coordination.lock`) contended by the
    /// Bioreactor, every niche's PHASE Evaluator, and the Graduator.
    pub fn new(
        registry: Arc<Registry>,
        phase_fitness: Arc<LedgerStore<PhaseFitnessRecord>>,
        driver: WorkloadDriver,
        lifecycle_log: Arc<LifecycleEventLog>,
        bus: Arc<ChemBus>,
        lock_path: impl AsRef<Path>,
    ) -> Self {
        Self {
            registry,
            phase_fitness,
            driver,
            lifecycle_log,
            bus,
            lock_path: lock_path.as_ref().to_path_buf(),
        }
    }

    /// Run one PHASE batch for `niche` (steps 1-5).
    #[instrument(skip(self, profile, policy), fields(niche = %niche, window = ?window))]
    pub async fn run_batch(
        &self,
        niche: &NicheKey,
        profile: &WorkloadProfile,
        policy: &PolicyDefaults,
        window: PhaseWindow,
        now: DateTime<Utc>,
        max_candidates: usize,
        seed_base: u64,
    ) -> Result<BatchReport> {
        let batch_id = format!("{niche}-{}", uuid::Uuid::new_v4());

        let _guard = match window {
            PhaseWindow::Deep => LockGuard::acquire_blocking(&self.lock_path)?,
            PhaseWindow::Light => match LockGuard::try_acquire(&self.lock_path)? {
                Some(g) => g,
                None => {
                    return Ok(BatchReport {
                        batch_id,
                        skipped: true,
                        ..Default::default()
                    })
                }
            },
        };

        let eligible = self.select_candidates(niche, now, max_candidates).await;
        if eligible.is_empty() {
            return Ok(BatchReport { batch_id, ..Default::default() });
        }

        let started = self.open_batch(&eligible, &batch_id, now).await?;
        if started.is_empty() {
            return Ok(BatchReport { batch_id, ..Default::default() });
        }

        self.emit_batch_started(&batch_id, niche, &started).await;

        if profile.catastrophic_rule.is_none() {
            let mut facts = Facts::new();
            facts.insert("niche".into(), Value::String(niche.to_string()));
            facts.insert("batch_id".into(), Value::String(batch_id.clone()));
            let _ = self
                .bus
                .emit(signals::CATASTROPHIC_RULE_MISSING, &niche.ecosystem, 1.0, facts, "phase_evaluator")
                .await;
        }

        let mut catastrophic = Vec::new();
        for (attempt_index, name) in started.iter().enumerate() {
            let seed = seed_base.wrapping_add(attempt_index as u64);
            if self
                .run_candidate(name, &batch_id, profile, policy, seed, now)
                .await?
            {
                catastrophic.push(name.clone());
            }
        }

        self.emit_batch_closed(&batch_id, niche, &started, &catastrophic).await;

        Ok(BatchReport {
            batch_id,
            started,
            catastrophic,
            skipped: false,
        })
    }

    async fn select_candidates(&self, niche: &NicheKey, now: DateTime<Utc>, max: usize) -> Vec<String> {
        let dormant = self.registry.list(niche, LifecycleState::Dormant).await;
        let mut eligible = Vec::new();
        for name in dormant {
            if let Some(zooid) = self.registry.get(&name).await {
                if !zooid.in_cooldown(now) {
                    eligible.push(name);
                }
            }
            if eligible.len() >= max {
                break;
            }
        }
        eligible
    }

    /// DORMANT -> PROBATION for every eligible candidate, in one transaction.
    async fn open_batch(
        &self,
        eligible: &[String],
        batch_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let names = eligible.to_vec();
        let batch_id_owned = batch_id.to_string();
        let opened = self
            .registry
            .transaction(move |state| {
                let mut opened = Vec::new();
                for name in &names {
                    let zooid = match state.zooids.get(name) {
                        Some(z) => z,
                        None => continue,
                    };
                    let req = match kloros_lifecycle::batch_start(zooid, now) {
                        Ok(req) => req,
                        Err(_) => continue,
                    };
                    let zooid = state.zooids.get_mut(name).unwrap();
                    let from = zooid.lifecycle_state;
                    kloros_lifecycle::apply(zooid, req)?;
                    zooid.phase.started_ts = Some(now);
                    zooid.phase.batches.push(batch_id_owned.clone());
                    state.reindex(name, LifecycleState::Probation)?;
                    opened.push((from, state.zooids.get(name).unwrap().clone()));
                }
                Ok(opened)
            })
            .await?;

        let mut names_opened = Vec::with_capacity(opened.len());
        for (from, zooid) in &opened {
            let _ = self.lifecycle_log.record(zooid, *from, Reason::BatchStart, None).await;
            names_opened.push(zooid.name.clone());
        }
        Ok(names_opened)
    }

    /// Drive one candidate through `profile.observations_per_batch` sandboxed
    /// runs, appending one `phase_fitness` row per observation regardless of
    /// outcome. A crashed or timed-out observation still yields a zero-score
    /// row and the candidate continues; it is retired only once
    /// `policy.catastrophic_crash_limit` of its observations this batch have
    /// crashed. Returns `true` if the candidate was retired.
    async fn run_candidate(
        &self,
        name: &str,
        batch_id: &str,
        profile: &WorkloadProfile,
        policy: &PolicyDefaults,
        seed: u64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut crash_count = 0u32;
        for attempt in 1..=profile.observations_per_batch.max(1) {
            let run = self.driver.run(profile, name, seed + attempt as u64, attempt).await?;

            let crashed = match &profile.catastrophic_rule {
                Some(rule) => run.anomalies.iter().any(|a| a == rule),
                None => !run.completed,
            };

            self.phase_fitness.append(
                now.timestamp_millis(),
                &PhaseFitnessRecord {
                    ts: Utc::now(),
                    batch_id: batch_id.to_string(),
                    zooid: name.to_string(),
                    attempt,
                    workload_profile_id: format!("{}:{}", profile.driver_command, profile.driver_args.join(" ")),
                    seed,
                    fitness: run.composite,
                    metrics: run.metrics.clone(),
                    completed: run.completed,
                    timed_out: run.timed_out,
                    crashed,
                    anomalies: run.anomalies.clone(),
                    duration_ms: run.duration_ms,
                },
            )?;

            if crashed {
                crash_count += 1;
                warn!(zooid = %name, attempt, crash_count, "PHASE observation crashed or timed out");
                if crash_count >= policy.catastrophic_crash_limit.max(1) {
                    warn!(zooid = %name, attempt, "PHASE candidate flagged catastrophic");
                    self.retire_catastrophic(name, now).await?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn retire_catastrophic(&self, name: &str, now: DateTime<Utc>) -> Result<()> {
        let name_owned = name.to_string();
        let (from, zooid) = self
            .registry
            .transaction(move |state| {
                let zooid = state
                    .zooids
                    .get_mut(&name_owned)
                    .ok_or_else(|| kloros_registry::RegistryError::NotFound(name_owned.clone()))?;
                let from = zooid.lifecycle_state;
                let req = kloros_lifecycle::catastrophic_fail(zooid, now)?;
                kloros_lifecycle::apply(zooid, req)?;
                state.reindex(&name_owned, LifecycleState::Retired)?;
                Ok((from, zooid.clone()))
            })
            .await?;
        let _ = self
            .lifecycle_log
            .record(&zooid, from, Reason::SyntheticCatastrophe, None)
            .await;
        Ok(())
    }

    async fn emit_batch_started(&self, batch_id: &str, niche: &NicheKey, started: &[String]) {
        let mut facts = Facts::new();
        facts.insert("batch_id".into(), Value::String(batch_id.to_string()));
        facts.insert("niche".into(), Value::String(niche.to_string()));
        facts.insert("candidates".into(), Value::from(started.len() as u64));
        let _ = self
            .bus
            .emit(signals::PHASE_BATCH_STARTED, &niche.ecosystem, 1.0, facts, "phase_evaluator")
            .await;
        info!(%batch_id, niche = %niche, started = started.len(), "PHASE batch opened");
    }

    async fn emit_batch_closed(
        &self,
        batch_id: &str,
        niche: &NicheKey,
        started: &[String],
        catastrophic: &[String],
    ) {
        let surviving: Vec<&String> = started.iter().filter(|n| !catastrophic.contains(n)).collect();
        let mut facts = Facts::new();
        facts.insert("batch_id".into(), Value::String(batch_id.to_string()));
        facts.insert("niche".into(), Value::String(niche.to_string()));
        facts.insert(
            "candidates".into(),
            Value::Array(surviving.iter().map(|n| Value::String((*n).clone())).collect()),
        );
        let _ = self
            .bus
            .emit(signals::PHASE_BATCH_CLOSED, &niche.ecosystem, 1.0, facts, "phase_evaluator")
            .await;
        info!(%batch_id, niche = %niche, surviving = surviving.len(), "PHASE batch closed");
    }
}
