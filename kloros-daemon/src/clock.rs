//! Clock-skew check at startup: each component logs NTP skew, and if skew
//! exceeds 5 seconds, schedule-critical components refuse to start and
//! emit `governance.clock_skew`.
//!
//! Nothing in this workspace's dependency stack speaks NTP, and reaching
//! out to one would add a dependency with no other use. Skew is instead
//! checked against an operator-supplied reference timestamp (e.g. written
//! by an external time-sync probe to `KLOROS_CLOCK_REFERENCE`, RFC3339).
//! When no reference is configured the check is skipped with a warning
//! rather than guessed at (see DESIGN.md Open Questions).

use chrono::{DateTime, Utc};
use kloros_bus::{ChemBus, Facts};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{DaemonError, Result};

/// Default maximum tolerated skew before refusing to start ("5 seconds").
pub const DEFAULT_MAX_SKEW_SEC: i64 = 5;

/// Compare `reference` (an externally trusted timestamp) against the local
/// clock, logging the skew either way. `schedule_critical` components
/// return [`DaemonError::ClockSkew`] and emit `governance.clock_skew` when
/// the skew exceeds `max_skew_sec`; non-critical components only log.
pub async fn check_clock_skew(
    reference: Option<DateTime<Utc>>,
    max_skew_sec: i64,
    schedule_critical: bool,
    bus: &Arc<ChemBus>,
) -> Result<()> {
    let Some(reference) = reference else {
        warn!("no clock reference configured (KLOROS_CLOCK_REFERENCE unset), skipping skew check");
        return Ok(());
    };

    let skew = (Utc::now() - reference).num_seconds();
    info!(skew_sec = skew, "startup clock skew");

    if skew.abs() <= max_skew_sec {
        return Ok(());
    }

    let mut facts = Facts::new();
    facts.insert("skew_sec".into(), Value::from(skew));
    facts.insert("max_sec".into(), Value::from(max_skew_sec));
    let _ = bus.emit("governance.clock_skew", "", 1.0, facts, "daemon").await;

    if schedule_critical {
        return Err(DaemonError::ClockSkew {
            skew_sec: skew,
            max_sec: max_skew_sec,
        });
    }

    warn!(skew_sec = skew, "clock skew exceeds limit; continuing (not schedule-critical)");
    Ok(())
}
