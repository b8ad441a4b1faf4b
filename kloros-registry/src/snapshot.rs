//! Atomic versioned snapshot protocol ("Atomic write protocol"):
//! write `snapshot.v{N+1}.tmp`, fsync, rename to `snapshot.v{N+1}`, then
//! write-and-rename a `CANONICAL` pointer file holding the latest version,
//! fsyncing the containing directory after each rename. Bodies are
//! `bincode`-encoded, following `LockchainStorage`'s use of `bincode` over a
//! durable store.

use crate::error::{RegistryError, Result};
use crate::state::RegistryState;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::instrument;

const CANONICAL_FILE: &str = "CANONICAL";

fn io_err(path: &Path, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn snapshot_path(dir: &Path, version: u64) -> PathBuf {
    dir.join(format!("snapshot.v{version}"))
}

/// Read the canonical pointer and load the snapshot it names. Returns a
/// fresh, empty `RegistryState` at version 0 if no snapshot has ever been
/// written (first startup).
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn load_canonical(dir: &Path) -> Result<RegistryState> {
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    let canonical = dir.join(CANONICAL_FILE);
    if !canonical.exists() {
        return Ok(RegistryState::default());
    }

    let version_str = fs::read_to_string(&canonical).map_err(|e| io_err(&canonical, e))?;
    let version: u64 = version_str.trim().parse().map_err(|_| {
        RegistryError::CorruptRegistry(format!("CANONICAL pointer is not a version number: {version_str:?}"))
    })?;

    let path = snapshot_path(dir, version);
    let bytes = fs::read(&path).map_err(|e| io_err(&path, e))?;
    let state: RegistryState = bincode::deserialize(&bytes)?;

    if state.version != version {
        return Err(RegistryError::CorruptRegistry(format!(
            "CANONICAL points at version {version} but snapshot body carries version {}",
            state.version
        )));
    }

    state
        .check_invariants()
        .map_err(|e| RegistryError::CorruptRegistry(e.to_string()))?;

    Ok(state)
}

/// Write `state` (whose `version` must already be the new version) as
/// `snapshot.v{version}` and atomically advance the canonical pointer to it.
#[instrument(skip_all, fields(dir = %dir.display(), version = state.version))]
pub fn write_snapshot(dir: &Path, state: &RegistryState) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let final_path = snapshot_path(dir, state.version);
    let tmp_path = dir.join(format!("snapshot.v{}.tmp", state.version));
    let bytes = bincode::serialize(state)?;

    {
        let mut f = File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        f.write_all(&bytes).map_err(|e| io_err(&tmp_path, e))?;
        f.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, &final_path).map_err(|e| io_err(&final_path, e))?;

    let canonical_tmp = dir.join("CANONICAL.tmp");
    fs::write(&canonical_tmp, state.version.to_string()).map_err(|e| io_err(&canonical_tmp, e))?;
    let canonical = dir.join(CANONICAL_FILE);
    fs::rename(&canonical_tmp, &canonical).map_err(|e| io_err(&canonical, e))?;

    sync_dir(dir)?;
    Ok(())
}

/// Delete snapshot bodies older than `keep_last` versions behind the
/// current one ("Old versions retained for a configurable rolling
/// window"). Never removes the canonical version itself.
pub fn prune_old_versions(dir: &Path, current_version: u64, keep_last: u64) -> Result<()> {
    if current_version <= keep_last {
        return Ok(());
    }
    let oldest_to_keep = current_version - keep_last;
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(v) = name.strip_prefix("snapshot.v").and_then(|s| s.parse::<u64>().ok()) {
            if v < oldest_to_keep {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    let f = File::open(dir).map_err(|e| io_err(dir, e))?;
    f.sync_all().map_err(|e| io_err(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
