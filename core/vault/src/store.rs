//! Manifest persistence and backup copies under the vault home.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{create_private_dir, VaultHome, FILE_MODE};
use crate::lock::ManifestLock;
use crate::manifest::{timestamp, VaultEntry, VaultManifest};
use secretvault_common::{paths, write_atomic, Error, ProjectContext, Result};

/// Owns a project's manifest on disk.
///
/// Callers get copies of the manifest; every mutation goes through a method
/// here, which holds the manifest lock across load, mutate and save.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    home: VaultHome,
    ctx: ProjectContext,
}

impl ManifestStore {
    pub fn new(home: VaultHome, ctx: ProjectContext) -> Self {
        Self { home, ctx }
    }

    pub fn home(&self) -> &VaultHome {
        &self.home
    }

    pub fn context(&self) -> &ProjectContext {
        &self.ctx
    }

    /// Manifest file location.
    pub fn manifest_path(&self) -> PathBuf {
        self.home.manifest_path(self.ctx.project_id())
    }

    /// Read the manifest, or an empty one if none exists yet.
    ///
    /// Nothing is written when the manifest is missing.
    ///
    /// # Errors
    /// - `Manifest` if the file is not valid JSON
    /// - The file exists but cannot be read
    pub fn load(&self) -> Result<(VaultManifest, PathBuf)> {
        let path = self.manifest_path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((VaultManifest::new(&self.ctx), path));
            }
            Err(e) => return Err(Error::io("read manifest", &path, e)),
        };

        let mut manifest: VaultManifest = serde_json::from_slice(&data)
            .map_err(|e| Error::Manifest(format!("{}: {}", path.display(), e)))?;
        manifest.backfill(&self.ctx);
        Ok((manifest, path))
    }

    /// Write the whole manifest atomically with mode 0600.
    pub fn save(&self, path: &Path, manifest: &VaultManifest) -> Result<()> {
        if let Some(parent) = path.parent() {
            create_private_dir(parent)?;
        }
        let data = serde_json::to_vec_pretty(manifest)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        write_atomic(path, &data, FILE_MODE)?;
        debug!(path = %path.display(), entries = manifest.len(), "manifest saved");
        Ok(())
    }

    /// Load, mutate and save under the manifest lock.
    ///
    /// The manifest is saved only if `f` succeeds and returns `true` as its
    /// first value; `updated_at` is stamped before saving.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut VaultManifest) -> Result<(bool, T)>,
    ) -> Result<T> {
        let _lock = ManifestLock::acquire(&self.home.manifest_lock_path(self.ctx.project_id()))?;
        let (mut manifest, path) = self.load()?;
        let (changed, value) = f(&mut manifest)?;
        if changed {
            manifest.touch();
            self.save(&path, &manifest)?;
        }
        Ok(value)
    }

    /// Track a freshly locked file.
    ///
    /// Copies the ciphertext to the content-addressed backup slot and
    /// replaces any existing entry for the same path. Remote provenance of a
    /// previous entry is not carried over.
    ///
    /// # Postconditions
    /// - `projects/<pid>/files/<id[0:2]>/<id>.svault` holds the ciphertext, mode 0600
    /// - The manifest entry keyed by the absolute original path is current
    ///
    /// # Errors
    /// - The ciphertext cannot be read
    /// - Backup or manifest write failed
    pub fn upsert(&self, original: &Path, encrypted: &Path, original_mode: u32) -> Result<VaultEntry> {
        let original = paths::absolutize(original)?;
        let encrypted = paths::absolutize(encrypted)?;

        self.update(|manifest| {
            let entry = VaultEntry::locked(&self.ctx, &original, &encrypted, original_mode)?;
            let backup = self.home.backup_path(self.ctx.project_id(), &entry.vault_file);
            if let Some(parent) = backup.parent() {
                create_private_dir(parent)?;
            }
            let payload = fs::read(&encrypted).map_err(|e| Error::io("read", &encrypted, e))?;
            write_atomic(&backup, &payload, FILE_MODE)?;

            info!(path = %original.display(), file_id = %entry.file_id, "tracked");
            manifest.insert(entry.clone());
            Ok((true, entry))
        })
    }

    /// Record a remote copy on an existing entry.
    ///
    /// # Errors
    /// - `EntryNotFound` if `original` is not tracked
    pub fn annotate_remote(
        &self,
        original: &Path,
        vault: &str,
        document_id: &str,
        title: &str,
        checksum: &str,
    ) -> Result<VaultEntry> {
        let original = paths::absolutize(original)?;
        self.update(|manifest| {
            let key = original.to_string_lossy().into_owned();
            let entry = manifest
                .entries
                .get_mut(&key)
                .ok_or_else(|| Error::EntryNotFound(original.clone()))?;
            entry.set_remote(vault, document_id, title, checksum);
            Ok((true, entry.clone()))
        })
    }

    /// Forget remote copies of the given entries, saving once.
    ///
    /// Returns how many entries changed. Untracked keys are ignored.
    pub fn clear_remote(&self, keys: &[String]) -> Result<usize> {
        self.update(|manifest| {
            let mut cleared = 0;
            for key in keys {
                if let Some(entry) = manifest.entries.get_mut(key) {
                    entry.clear_remote();
                    cleared += 1;
                }
            }
            Ok((cleared > 0, cleared))
        })
    }

    /// Stamp `last_restored_at` on the given entries, saving once.
    pub fn mark_restored(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let now = timestamp();
        self.update(|manifest| {
            let mut changed = false;
            for key in keys {
                if let Some(entry) = manifest.entries.get_mut(key) {
                    entry.last_restored_at = now.clone();
                    changed = true;
                }
            }
            Ok((changed, ()))
        })
    }

    /// Absolute path of an entry's vault-home backup.
    ///
    /// Uses the recorded reference, else recomputes it from the file id.
    ///
    /// # Errors
    /// - `MissingFileId` if the entry has neither
    pub fn backup_path(&self, entry: &VaultEntry) -> Result<PathBuf> {
        let reference = if !entry.vault_file.trim().is_empty() {
            entry.vault_file.clone()
        } else if entry.file_id.is_empty() {
            return Err(Error::MissingFileId);
        } else {
            entry.file_id.backup_reference()?
        };
        Ok(self.home.backup_path(self.ctx.project_id(), &reference))
    }
}
