//! The Introspection Scanner daemon: maintains the rolling observation
//! cache and runs the registered scanners on `Q_TRIGGER_` signals.
//!
//! Standalone/manual entry point; `kloros-supervisor` is the production
//! binary that runs this alongside every other component on one bus.

use clap::Parser;
use kloros_bus::{signals, ChemBus};
use kloros_daemon::cli::CommonArgs;
use kloros_daemon::{bootstrap, clock, context, shutdown, SharedContext};
use kloros_introspection::{BackpressureScanner, BottleneckScanner, ObservationCache, Scanner, ScannerRunner};
use std::sync::Arc;
use tracing::info;

/// Zooids need at least this many tallied observations before the
/// bottleneck scanner will flag an elevated failure rate.
const BOTTLENECK_MIN_SAMPLES: usize = 20;
/// Failure-rate fraction at or above which the bottleneck scanner flags a zooid.
const BOTTLENECK_FAILURE_RATE_THRESHOLD: f64 = 0.3;
/// Backpressure occurrences within the cache window before flagging.
const BACKPRESSURE_MIN_OCCURRENCES: usize = 5;

#[derive(Parser)]
#[command(name = "kloros-introspection-scanner-d", about = "Observation cache and capability-gap scanners")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing("kloros-introspection-scanner");
    let cli = Cli::parse();
    let ctx = SharedContext::build(&cli.common.state_root, &cli.common.config_dir, "kloros-introspection-scanner").await?;

    clock::check_clock_skew(context::clock_reference(), clock::DEFAULT_MAX_SKEW_SEC, false, &ctx.bus).await?;

    let cache = Arc::new(ObservationCache::new());
    let bus: Arc<ChemBus> = Arc::clone(&ctx.bus);
    bus.subscribe("", "observation_cache", None, Arc::clone(&cache)).await?;

    let scanners: Vec<Arc<dyn Scanner>> = vec![
        Arc::new(BottleneckScanner::new(BOTTLENECK_MIN_SAMPLES, BOTTLENECK_FAILURE_RATE_THRESHOLD)),
        Arc::new(BackpressureScanner::new(BACKPRESSURE_MIN_OCCURRENCES)),
    ];
    let runner = Arc::new(ScannerRunner::new(Arc::clone(&cache), Arc::clone(&ctx.bus), scanners));
    bus.subscribe(signals::TRIGGER_PREFIX, "scanner_runner", None, Arc::clone(&runner))
        .await?;

    info!("introspection scanner running");
    shutdown::signalled().await;
    info!("introspection scanner shutting down");
    Ok(())
}
