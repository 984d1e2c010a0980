//! Advisory lock held for the duration of a sync run.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive lock on a configuration directory's lock file.
///
/// Released when dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
}

impl RunLock {
    /// Takes the lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Locked`] if another holder has it, or an I/O
    /// error if the lock file cannot be opened.
    pub fn acquire(path: &Path) -> CoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(CoreError::Locked {
                path: path.to_path_buf(),
            });
        }

        tracing::debug!(path = %path.display(), "run lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        tracing::debug!(path = %self.path.display(), "run lock released");
    }
}
