//! Per-zooid consecutive tournament-loss counters, persisted across ticks
//! (step 4: "retired unless a policy predicate, e.g. lost in last
//! K consecutive ticks, says to retire"). Kept out of the `Zooid` record
//! itself since it is tournament bookkeeping, not lifecycle state.

use crate::error::Result;
use std::path::Path;

/// A small `sled`-backed counter map, one entry per zooid name.
pub struct LossTracker {
    tree: sled::Tree,
}

impl LossTracker {
    /// Open (or create) the `tournament_losses` tree inside the shared
    /// `sled` database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(db_path)?;
        let tree = db.open_tree("tournament_losses")?;
        Ok(Self { tree })
    }

    /// Current consecutive-loss streak for `zooid`.
    pub fn streak(&self, zooid: &str) -> Result<u32> {
        Ok(self
            .tree
            .get(zooid)?
            .map(|v| u32::from_be_bytes(v.as_ref().try_into().unwrap_or_default()))
            .unwrap_or(0))
    }

    /// Record a tournament loss, returning the new streak.
    pub fn record_loss(&self, zooid: &str) -> Result<u32> {
        let next = self.streak(zooid)? + 1;
        self.tree.insert(zooid, &next.to_be_bytes())?;
        Ok(next)
    }

    /// Reset a zooid's streak to zero (it won, or left the ACTIVE pool).
    pub fn reset(&self, zooid: &str) -> Result<()> {
        self.tree.remove(zooid)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streak_accumulates_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = LossTracker::open(dir.path()).unwrap();
        assert_eq!(tracker.streak("lm_001").unwrap(), 0);
        assert_eq!(tracker.record_loss("lm_001").unwrap(), 1);
        assert_eq!(tracker.record_loss("lm_001").unwrap(), 2);
        tracker.reset("lm_001").unwrap();
        assert_eq!(tracker.streak("lm_001").unwrap(), 0);
    }
}
