use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, warn};

use crate::error::PersistenceError;

/// Exclusive advisory lock held for the duration of one run.
///
/// Two triggers that overlap would otherwise both load the same state file
/// and could publish the same post twice. The lock is released when the
/// guard is dropped, and by the OS if the process dies.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Try to take the lock without blocking.
    ///
    /// Returns `Ok(None)` when another run holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, PersistenceError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| PersistenceError::LockFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!("Acquired run lock {}", path.display());
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e)
                if e.kind() == ErrorKind::WouldBlock
                    || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                Ok(None)
            }
            Err(e) => Err(PersistenceError::LockFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_holder_is_turned_away_until_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bot.lock");

        let first = RunLock::try_acquire(&path).unwrap();
        assert!(first.is_some());
        assert!(RunLock::try_acquire(&path).unwrap().is_none());

        drop(first);
        assert!(RunLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn unwritable_location_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("bot.lock");
        assert!(matches!(
            RunLock::try_acquire(&path),
            Err(PersistenceError::LockFailed { .. })
        ));
    }
}
