//! The Quarantine Monitor daemon: watches `OBSERVATION` outcomes and demotes
//! an ACTIVE zooid once its rolling production-failure window trips.
//! Purely bus-driven, with no tick loop of its own.
//!
//! Standalone/manual entry point; `kloros-supervisor` is the production
//! binary that runs this alongside every other component on one bus (and
//! is the only place `Graduator::prod_guard` is actually wired to it).

use clap::Parser;
use kloros_bus::ChemBus;
use kloros_daemon::cli::CommonArgs;
use kloros_daemon::{bootstrap, clock, context, shutdown, SharedContext};
use kloros_quarantine::QuarantineMonitor;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "kloros-quarantine-monitor-d", about = "Production-failure rolling window and quarantine trip")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing("kloros-quarantine-monitor");
    let cli = Cli::parse();
    let ctx = SharedContext::build(&cli.common.state_root, &cli.common.config_dir, "kloros-quarantine-monitor").await?;

    clock::check_clock_skew(context::clock_reference(), clock::DEFAULT_MAX_SKEW_SEC, false, &ctx.bus).await?;

    let monitor = Arc::new(QuarantineMonitor::new(
        Arc::clone(&ctx.registry),
        Arc::clone(&ctx.lifecycle_log),
        Arc::clone(&ctx.bus),
        Arc::new(ctx.config.policy.clone()),
    ));

    let bus: Arc<ChemBus> = Arc::clone(&ctx.bus);
    bus.subscribe(kloros_bus::signals::OBSERVATION, "quarantine_monitor", None, monitor)
        .await?;

    info!("quarantine monitor running");
    shutdown::signalled().await;
    info!("quarantine monitor shutting down");
    Ok(())
}
