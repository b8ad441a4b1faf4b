//! The Ledger Writer daemon: sole writer of the `fitness_ledger` stream
//!. Verifies the HMAC on every `OBSERVATION` and rolls
//! accumulated production outcomes up onto the Registry.
//!
//! Standalone/manual entry point; `kloros-supervisor` is the production
//! binary that runs this alongside every other component on one bus.

use clap::Parser;
use kloros_bus::ChemBus;
use kloros_daemon::cli::CommonArgs;
use kloros_daemon::{bootstrap, clock, context, shutdown, SharedContext};
use kloros_ledger::LedgerWriter;
use std::sync::Arc;
use tracing::info;

/// Observations accumulated per zooid before a roll-up onto the Registry
/// ("every N observations or T seconds").
const DEFAULT_ROLLUP_EVERY: usize = 20;

#[derive(Parser)]
#[command(name = "kloros-ledger-writer-d", about = "Signed production observation ledger")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Observations to accumulate per zooid before rolling up onto the Registry.
    #[arg(long, default_value_t = DEFAULT_ROLLUP_EVERY)]
    rollup_every: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing("kloros-ledger-writer");
    let cli = Cli::parse();
    let ctx = SharedContext::build(&cli.common.state_root, &cli.common.config_dir, "kloros-ledger-writer").await?;

    clock::check_clock_skew(context::clock_reference(), clock::DEFAULT_MAX_SKEW_SEC, false, &ctx.bus).await?;

    let writer = Arc::new(LedgerWriter::new(
        ctx.keyring.clone(),
        Arc::clone(&ctx.fitness_ledger),
        Arc::clone(&ctx.registry),
        Arc::clone(&ctx.bus),
        cli.rollup_every,
    ));

    let bus: Arc<ChemBus> = Arc::clone(&ctx.bus);
    bus.subscribe(kloros_bus::signals::OBSERVATION, "ledger_writer", None, writer)
        .await?;

    info!("ledger writer running");
    shutdown::signalled().await;
    info!("ledger writer shutting down");
    Ok(())
}
