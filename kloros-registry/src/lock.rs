//! The registry's single-writer file lock and the global coordination lock
//! shared by the Bioreactor, PHASE Evaluator, and Graduator. Implemented as
//! an advisory create-exclusive marker file
//! rather than `flock(2)`, since no file-locking crate is part of this
//! workspace's dependency stack; the marker is removed on `Drop`, so a
//! crash leaves a stale lock an operator must clear; there is no
//! automatic breaker for this, a deliberate fail-safe rather than an
//! oversight.

use crate::error::{RegistryError, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// A held exclusive lock; releases on drop.
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Block until the lock at `path` can be acquired. Registry transactions
    /// use this to serialize concurrent transactions via a file lock.
    pub fn acquire_blocking(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        loop {
            match try_create(&path) {
                Ok(true) => return Ok(Self { path }),
                Ok(false) => std::thread::sleep(std::time::Duration::from_millis(5)),
                Err(e) => return Err(e),
            }
        }
    }

    /// Attempt to acquire without blocking; used by LIGHT PHASE bursts,
    /// which must skip rather than wait when the global coordination lock
    /// is contended.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref().to_path_buf();
        if try_create(&path)? {
            Ok(Some(Self { path }))
        } else {
            Ok(None)
        }
    }
}

fn try_create(path: &Path) -> Result<bool> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RegistryError::Io {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(RegistryError::Io {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_try_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colony_cycle.lock");
        let first = LockGuard::try_acquire(&path).unwrap();
        assert!(first.is_some());
        let second = LockGuard::try_acquire(&path).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn lock_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colony_cycle.lock");
        {
            let _guard = LockGuard::try_acquire(&path).unwrap().unwrap();
        }
        let second = LockGuard::try_acquire(&path).unwrap();
        assert!(second.is_some());
    }
}
