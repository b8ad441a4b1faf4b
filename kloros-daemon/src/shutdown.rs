//! Graceful-shutdown signal handling shared by every component binary:
//! refuse new work, drain in-flight work with a deadline, persist state,
//! and exit. After the deadline, terminate forcibly.
//!
//! Every ledger write in this workspace is synchronous-durable on append
//! (`kloros-ledger::LedgerStore::append` flushes before returning), so
//! "persisting state" falls out of simply finishing the in-flight handler
//! rather than needing an explicit flush step here. Binaries drain by
//! `tokio::select!`-ing their work loop against this future and returning
//! once either fires.

use std::time::Duration;
use tracing::info;

/// Default grace period a component waits for in-flight work to drain
/// after a shutdown signal, before the process exits anyway.
pub const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// Resolves once the process receives SIGINT/SIGTERM (or, on platforms
/// without `tokio::signal::unix`, just SIGINT). Intended as one arm of a
/// `tokio::select!` alongside a binary's main work loop.
pub async fn signalled() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = term.recv() => info!("received SIGTERM"),
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c");
    }
}
