//! Atomic file replacement.
//!
//! Data is written to a temporary file in the target's own directory (so the
//! final rename never crosses filesystems), permissions are applied, and the
//! temporary is renamed over the target. Readers observe either the old
//! content or the complete new content.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::trace;

use crate::{Error, Result};

/// Prefix for temporary files created next to their targets.
pub const TEMP_PREFIX: &str = ".svault-tmp-";

/// A fully written temporary file that has not yet replaced its target.
///
/// Dropping a `StagedWrite` without calling [`StagedWrite::commit`] removes the
/// temporary and leaves the target exactly as it was.
#[derive(Debug)]
pub struct StagedWrite {
    target: PathBuf,
    temp: NamedTempFile,
}

impl StagedWrite {
    /// Write `data` with permission bits `mode` into a temporary beside `target`.
    ///
    /// # Errors
    /// - `Error::AtomicWrite` if the temporary cannot be created, written or chmod-ed
    pub fn stage(target: impl AsRef<Path>, data: &[u8], mode: u32) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let fail = |source| Error::AtomicWrite {
            path: target.clone(),
            source,
        };

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&dir)
            .map_err(fail)?;
        temp.write_all(data).map_err(fail)?;
        set_mode(temp.as_file(), mode).map_err(fail)?;
        temp.as_file().sync_all().map_err(fail)?;

        Ok(Self { target, temp })
    }

    /// Path of the temporary file.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Path that will be replaced on commit.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the temporary onto the target.
    pub fn commit(self) -> Result<()> {
        let Self { target, temp } = self;
        trace!(target = %target.display(), "committing atomic write");
        temp.persist(&target).map_err(|e| Error::AtomicWrite {
            path: target.clone(),
            source: e.error,
        })?;
        Ok(())
    }
}

/// Atomically replace `path` with `data`, giving it permission bits `mode`.
///
/// # Postconditions
/// - On success, `path` holds exactly `data` with `mode`
/// - On failure, `path` is untouched and no temporary file remains
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8], mode: u32) -> Result<()> {
    StagedWrite::stage(path, data, mode)?.commit()
}

#[cfg(unix)]
fn set_mode(file: &File, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(file: &File, mode: u32) -> std::io::Result<()> {
    let mut perms = file.metadata()?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    file.set_permissions(perms)
}
