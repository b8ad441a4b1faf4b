//! Shared CLI arguments every component binary parses before building a
//! [`crate::SharedContext`].

use clap::Args;
use std::path::PathBuf;

/// Common arguments for every `kloros-*-d` binary.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Root of this node's persisted state (registry, ledgers, locks).
    #[arg(long, env = "KLOROS_STATE_ROOT", default_value = "./state")]
    pub state_root: PathBuf,

    /// Directory holding `lifecycle_policy.toml`, `workload_profiles.toml`,
    /// `keys.toml`, and `niches.toml`.
    #[arg(long, env = "KLOROS_CONFIG_DIR", default_value = "./config")]
    pub config_dir: PathBuf,
}
