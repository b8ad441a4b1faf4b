//! The PHASE Evaluator daemon: drives DEEP batches on a daily cadence and
//! LIGHT bursts on an external `Q_TRIGGER_PHASE_LIGHT_BURST` signal. DEEP is
//! a daily multi-hour window; LIGHT is a short on-demand burst gated by the
//! global coordination lock.
//!
//! Standalone/manual entry point; `kloros-supervisor` is the production
//! binary that runs this alongside every other component on one bus.

use async_trait::async_trait;
use clap::Parser;
use kloros_bus::{ChemBus, Envelope, SignalHandler};
use kloros_daemon::cli::CommonArgs;
use kloros_daemon::{bootstrap, clock, context, shutdown, SharedContext};
use kloros_phase::{PhaseEvaluator, PhaseWindow, WorkloadDriver};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

/// Interval between DEEP batches ("a daily multi-hour window").
const DEEP_INTERVAL: Duration = Duration::from_secs(24 * 3600);
/// How many candidates one DEEP batch pulls in at a time, per niche.
const DEEP_MAX_CANDIDATES: usize = 200;
/// Bound on a LIGHT burst's candidate pool ("a bounded candidate subset").
const LIGHT_MAX_CANDIDATES: usize = 10;

#[derive(Parser)]
#[command(name = "kloros-phase-evaluator-d", about = "Synthetic PHASE evaluation batches")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

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

fn rand_seed() -> u64 {
    use rand::Rng;
    rand::thread_rng().gen()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing("kloros-phase-evaluator");
    let cli = Cli::parse();
    let ctx = Arc::new(SharedContext::build(&cli.common.state_root, &cli.common.config_dir, "kloros-phase-evaluator").await?);

    clock::check_clock_skew(context::clock_reference(), clock::DEFAULT_MAX_SKEW_SEC, false, &ctx.bus).await?;

    let driver = WorkloadDriver::new(context::driver_env_allowlist());
    let evaluator = Arc::new(PhaseEvaluator::new(
        Arc::clone(&ctx.registry),
        Arc::clone(&ctx.phase_fitness),
        driver,
        Arc::clone(&ctx.lifecycle_log),
        Arc::clone(&ctx.bus),
        ctx.phase_lock_path(),
    ));

    let bus: Arc<ChemBus> = Arc::clone(&ctx.bus);
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

        tokio::select! {
            _ = tokio::time::sleep(DEEP_INTERVAL) => {}
            _ = shutdown::signalled() => {
                info!("phase evaluator shutting down");
                return Ok(());
            }
        }
    }
}
