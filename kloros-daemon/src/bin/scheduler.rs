//! The Scheduler daemon: drives `policy.schedules` over the bus on a 1Hz
//! tick loop, adapting its pacing to `AFFECT_*` signals.
//!
//! Standalone/manual entry point; `kloros-supervisor` is the production
//! binary that runs this alongside every other component on one bus.

use clap::Parser;
use kloros_bus::{signals, ChemBus, SignalHandler};
use kloros_daemon::cli::CommonArgs;
use kloros_daemon::{bootstrap, clock, context, shutdown, SharedContext};
use kloros_scheduler::Scheduler;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "kloros-scheduler-d", about = "Named-schedule tick loop with affective pacing")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing("kloros-scheduler");
    let cli = Cli::parse();
    let ctx = SharedContext::build(&cli.common.state_root, &cli.common.config_dir, "kloros-scheduler").await?;

    clock::check_clock_skew(context::clock_reference(), clock::DEFAULT_MAX_SKEW_SEC, true, &ctx.bus).await?;

    let scheduler = Scheduler::new(Arc::clone(&ctx.bus), &ctx.config.policy);

    let bus: Arc<ChemBus> = Arc::clone(&ctx.bus);
    bus.subscribe(
        signals::AFFECT_PREFIX,
        "scheduler_affect",
        None,
        Arc::clone(&scheduler) as Arc<dyn SignalHandler>,
    )
    .await?;

    let run_handle = tokio::spawn(Arc::clone(&scheduler).run());

    info!("scheduler running");
    shutdown::signalled().await;
    scheduler.stop();
    let _ = run_handle.await;
    info!("scheduler shutting down");
    Ok(())
}
