//! The Historian daemon: records every bus envelope to rotating segment
//! files and periodically consolidates closed segments older than 24h into
//! the episodic ledger.
//!
//! Standalone/manual entry point; `kloros-supervisor` is the production
//! binary that runs this alongside every other component on one bus.

use clap::Parser;
use kloros_bus::ChemBus;
use kloros_daemon::cli::CommonArgs;
use kloros_daemon::{bootstrap, clock, context, shutdown, SharedContext};
use kloros_historian::{Consolidator, Historian};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::info;

/// How often a consolidation pass runs ("several times a day").
const CONSOLIDATION_INTERVAL: Duration = Duration::from_secs(6 * 3600);

#[derive(Parser)]
#[command(name = "kloros-historian-d", about = "Bus-history recording and consolidation")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing("kloros-historian");
    let cli = Cli::parse();
    let ctx = SharedContext::build(&cli.common.state_root, &cli.common.config_dir, "kloros-historian").await?;

    clock::check_clock_skew(context::clock_reference(), clock::DEFAULT_MAX_SKEW_SEC, false, &ctx.bus).await?;

    let historian = Historian::open(ctx.state_root.join("history"), Arc::clone(&ctx.bus)).await?;
    let consolidator = Consolidator::new(Arc::clone(&historian), Arc::clone(&ctx.episodic), Arc::clone(&ctx.bus));

    let bus: Arc<ChemBus> = Arc::clone(&ctx.bus);
    bus.subscribe("", "historian", None, Arc::clone(&historian)).await?;

    info!("historian running");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(CONSOLIDATION_INTERVAL) => {
                match consolidator.run().await {
                    Ok(n) => info!(consolidated = n, "consolidation pass complete"),
                    Err(err) => tracing::error!(error = %err, "consolidation pass failed"),
                }
            }
            _ = shutdown::signalled() => {
                info!("historian shutting down");
                return Ok(());
            }
        }
    }
}
