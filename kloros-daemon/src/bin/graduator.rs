//! The Graduator daemon: evaluates the graduation gate for every candidate
//! named in a `governance.phase_batch_closed` batch, and rolls back promoted
//! zooids that miss their first post-promotion heartbeat.
//!
//! Runs as its own process, so it
//! holds no live [`kloros_core::ProdGuardFailureLookup`] from the Quarantine
//! Monitor process; see `Graduator::new`'s doc comment. The production
//! guard clause of the graduation gate is then always satisfied; the
//! Quarantine Monitor's own ACTIVE -> DORMANT demotion still enforces
//! production health independently once a zooid is live.

use clap::Parser;
use kloros_bus::ChemBus;
use kloros_daemon::cli::CommonArgs;
use kloros_daemon::{bootstrap, clock, context, shutdown, SharedContext};
use kloros_graduator::Graduator;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "kloros-graduator-d", about = "Graduation gate and post-promotion heartbeat rollback")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing("kloros-graduator");
    let cli = Cli::parse();
    let ctx = SharedContext::build(&cli.common.state_root, &cli.common.config_dir, "kloros-graduator").await?;

    clock::check_clock_skew(context::clock_reference(), clock::DEFAULT_MAX_SKEW_SEC, false, &ctx.bus).await?;

    let graduator = Arc::new(Graduator::new(
        Arc::clone(&ctx.registry),
        Arc::clone(&ctx.phase_fitness),
        Arc::clone(&ctx.lifecycle_log),
        Arc::clone(&ctx.bus),
        Arc::new(ctx.config.policy.clone()),
        None,
    ));

    let bus: Arc<ChemBus> = Arc::clone(&ctx.bus);
    bus.subscribe("", "graduator", None, graduator).await?;

    info!("graduator running");
    shutdown::signalled().await;
    info!("graduator shutting down");
    Ok(())
}
