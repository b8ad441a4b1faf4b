//! The kill switch: presence of a designated
//! `emergency_stop` file causes every ACTIVE zooid, on its next
//! `OBSERVATION` boundary, to refuse further work, while the core itself
//! keeps running read-only (no promotions, no bioreactor writes). Zooids
//! are external processes and check this file themselves via the shared
//! secret/config path; inside the core, the tick-driving components
//! (Bioreactor, PHASE Evaluator, Graduator promotion) consult it here
//! before performing a write.

use std::path::{Path, PathBuf};

/// Filename checked inside `state_root` for the kill switch.
pub const EMERGENCY_STOP_FILENAME: &str = "emergency_stop";

/// Whether the kill switch is currently tripped for `state_root`.
pub fn is_active(state_root: impl AsRef<Path>) -> bool {
    path_for(state_root).exists()
}

/// Path the kill switch file would live at, for components that want to
/// report it without re-deriving the join themselves.
pub fn path_for(state_root: impl AsRef<Path>) -> PathBuf {
    state_root.as_ref().join(EMERGENCY_STOP_FILENAME)
}
