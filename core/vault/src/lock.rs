//! Advisory lock serialising manifest read-modify-write cycles.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::{create_private_dir, FILE_MODE};
use secretvault_common::{Error, Result};

/// Exclusive advisory lock held until drop.
///
/// Only cooperating processes are excluded; the manifest itself stays readable.
#[derive(Debug)]
pub struct ManifestLock {
    file: File,
    path: PathBuf,
}

impl ManifestLock {
    /// Block until the lock at `path` is held, creating the file if needed.
    ///
    /// # Errors
    /// - The lock file or its directory cannot be created
    /// - The OS refuses the lock
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            create_private_dir(parent)?;
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(FILE_MODE);
        }
        let file = options
            .open(path)
            .map_err(|e| Error::io("open lock file", path, e))?;
        file.lock().map_err(|e| Error::io("lock", path, e))?;

        debug!(path = %path.display(), "manifest lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "failed to release manifest lock");
        }
    }
}
