//! The Bioreactor daemon: runs one differentiate/de-duplicate/register/
//! tournament tick per niche, scheduled nightly or triggered manually.
//!
//! Standalone/manual entry point; `kloros-supervisor` is the production
//! binary that runs this alongside every other component on one bus.

use clap::Parser;
use kloros_bioreactor::{Bioreactor, LossTracker, PhenotypeStore};
use kloros_daemon::cli::CommonArgs;
use kloros_daemon::{bootstrap, clock, context, shutdown, SharedContext};
use rand::SeedableRng;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

/// Tick interval between Bioreactor runs, scheduled nightly.
const TICK_INTERVAL: Duration = Duration::from_secs(24 * 3600);

#[derive(Parser)]
#[command(name = "kloros-bioreactor-d", about = "Candidate differentiation and tournament selection")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Run exactly one tick across every configured niche, then exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing("kloros-bioreactor");
    let cli = Cli::parse();
    let ctx = SharedContext::build(&cli.common.state_root, &cli.common.config_dir, "kloros-bioreactor").await?;

    clock::check_clock_skew(context::clock_reference(), clock::DEFAULT_MAX_SKEW_SEC, false, &ctx.bus).await?;

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
                    Ok(report) => info!(
                        niche = %niche.key(),
                        registered = report.registered.len(),
                        duplicates = report.duplicates_discarded,
                        winners = report.winners.len(),
                        retired = ?report.retired,
                        "bioreactor tick complete"
                    ),
                    Err(err) => tracing::error!(niche = %niche.key(), error = %err, "bioreactor tick failed"),
                }
            }
        }

        if cli.once {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(TICK_INTERVAL) => {}
            _ = shutdown::signalled() => {
                info!("bioreactor shutting down");
                return Ok(());
            }
        }
    }
}
