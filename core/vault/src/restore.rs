//! Restore resolver: pick entries, find the best source, rebuild plaintext.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::manifest::{VaultEntry, VaultManifest};
use crate::store::ManifestStore;
use secretvault_common::{paths, write_atomic, Error, ProjectContext, Result};
use secretvault_crypto::file::sidecar_path;
use secretvault_crypto::{restore_plaintext, VaultKey, DEFAULT_MODE};
use secretvault_storage::DocumentStore;

/// Entries to restore.
///
/// Without names: every entry in key order whose target is missing, or all
/// of them when `restore_all` is set. With names: each name matches first
/// as an absolute manifest key, then by relative path or basename against
/// every entry. Duplicates are dropped and unmatched names add nothing.
pub fn select_entries(
    ctx: &ProjectContext,
    manifest: &VaultManifest,
    names: &[String],
    restore_all: bool,
) -> Vec<VaultEntry> {
    if manifest.is_empty() {
        return Vec::new();
    }

    if names.is_empty() {
        return manifest
            .sorted_entries()
            .filter(|entry| restore_all || !paths::exists(&entry.target_path(ctx)))
            .cloned()
            .collect();
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        let candidate = name.trim();
        if candidate.is_empty() {
            continue;
        }

        if let Ok(absolute) = paths::absolutize(candidate) {
            if let Some(entry) = manifest.get(&absolute) {
                if seen.insert(entry.absolute_path.clone()) {
                    out.push(entry.clone());
                }
                continue;
            }
        }

        let wanted = paths::clean(Path::new(candidate));
        for entry in manifest.sorted_entries() {
            let by_relative = !entry.relative_path.is_empty()
                && paths::clean(Path::new(&entry.relative_path)) == wanted;
            let by_name = Path::new(&entry.absolute_path).file_name() == Some(wanted.as_os_str());
            if (by_relative || by_name) && seen.insert(entry.absolute_path.clone()) {
                out.push(entry.clone());
            }
        }
    }
    out
}

/// Path an entry's plaintext is restored to.
pub fn resolve_target_path(ctx: &ProjectContext, entry: &VaultEntry) -> PathBuf {
    entry.target_path(ctx)
}

/// First existing local ciphertext for an entry.
///
/// Order: sidecar next to the target, recorded project sidecar, vault-home backup.
///
/// # Errors
/// - `MissingFileId` if the backup path cannot be derived
pub fn resolve_local_source(
    store: &ManifestStore,
    entry: &VaultEntry,
    target: &Path,
) -> Result<Option<PathBuf>> {
    let backup = store.backup_path(entry)?;
    let candidates = [
        sidecar_path(target),
        PathBuf::from(&entry.project_encrypted_file),
        backup,
    ];
    Ok(candidates.into_iter().find(|c| paths::exists(c)))
}

/// Where restored plaintext came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSource {
    /// A local ciphertext file.
    Local(PathBuf),
    /// A remote document, by id.
    Remote(String),
}

/// Result of a restore run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// Targets written, with their source.
    pub restored: Vec<(PathBuf, RestoreSource)>,
    /// Targets left alone because they exist and force was not given.
    pub skipped: Vec<PathBuf>,
}

/// Runs the restore flow for selected entries.
pub struct Restorer<'a> {
    store: &'a ManifestStore,
    key: Option<&'a VaultKey>,
    remote: Option<&'a dyn DocumentStore>,
}

impl<'a> Restorer<'a> {
    /// `key` may be absent when only remote sources are expected.
    pub fn new(store: &'a ManifestStore, key: Option<&'a VaultKey>) -> Self {
        Self {
            store,
            key,
            remote: None,
        }
    }

    /// Fall back to `remote` when no local ciphertext exists.
    pub fn with_remote(mut self, remote: &'a dyn DocumentStore) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Restore each entry in order, then stamp `last_restored_at` once.
    ///
    /// Existing targets are skipped unless `force` is set; the check happens
    /// before any decryption or remote fetch.
    ///
    /// # Errors
    /// - `NoSourceAvailable` if neither a local ciphertext nor a remote
    ///   document exists for an entry
    /// - `NotFound` if a local source exists but no key was supplied
    /// - Any decryption, fetch or write failure
    ///
    /// Entries restored before a failure are still stamped; if that stamping
    /// also fails it is logged and the restore error is returned.
    pub fn restore(&self, entries: &[VaultEntry], force: bool) -> Result<RestoreOutcome> {
        let ctx = self.store.context();
        let mut outcome = RestoreOutcome::default();
        let mut stamped = Vec::new();

        let mut result = Ok(());
        for entry in entries {
            let target = resolve_target_path(ctx, entry);
            if paths::exists(&target) && !force {
                warn!(path = %target.display(), "already exists, skipping");
                outcome.skipped.push(target);
                continue;
            }

            match self.restore_entry(entry, &target, force) {
                Ok(source) => {
                    info!(path = %target.display(), "restored");
                    stamped.push(entry.absolute_path.clone());
                    outcome.restored.push((target, source));
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        match result {
            Ok(()) => {
                self.store.mark_restored(&stamped)?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(stamp_err) = self.store.mark_restored(&stamped) {
                    warn!(error = %stamp_err, "could not record restored entries");
                }
                Err(e)
            }
        }
    }

    fn restore_entry(&self, entry: &VaultEntry, target: &Path, force: bool) -> Result<RestoreSource> {
        if let Some(source) = resolve_local_source(self.store, entry, target)? {
            debug!(source = %source.display(), "using local ciphertext");
            let key = self
                .key
                .ok_or_else(|| Error::NotFound("vault key for this project".to_string()))?;
            restore_plaintext(&source, target, key, entry.original_mode, force)?;
            return Ok(RestoreSource::Local(source));
        }

        let remote = entry.remote_document();
        match (remote, self.remote) {
            (Some(doc), Some(store)) => {
                debug!(store = store.name(), "using remote document");
                let vault = Some(doc.vault).filter(|v| !v.trim().is_empty());
                let plaintext = store.fetch(doc.document_id, vault)?;
                let mode = if entry.original_mode == 0 {
                    DEFAULT_MODE
                } else {
                    entry.original_mode
                };
                if let Some(parent) = target.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        fs::create_dir_all(parent)
                            .map_err(|e| Error::io("create directory", parent, e))?;
                    }
                }
                write_atomic(target, plaintext.as_bytes(), mode)?;
                Ok(RestoreSource::Remote(doc.document_id.to_string()))
            }
            _ => Err(Error::NoSourceAvailable(target.to_path_buf())),
        }
    }
}

/// Presence of each copy of a tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStatus {
    /// Relative path, or absolute path for files outside the project.
    pub display: String,
    pub target: PathBuf,
    pub plaintext: bool,
    pub project_sidecar: bool,
    pub backup: bool,
    pub remote: bool,
}

/// Status of every tracked entry in key order.
///
/// # Errors
/// - `MissingFileId` for an entry whose backup path cannot be derived
pub fn status(store: &ManifestStore, manifest: &VaultManifest) -> Result<Vec<EntryStatus>> {
    let ctx = store.context();
    manifest
        .sorted_entries()
        .map(|entry| {
            let target = resolve_target_path(ctx, entry);
            let display = if entry.relative_path.trim().is_empty() {
                entry.absolute_path.clone()
            } else {
                entry.relative_path.clone()
            };
            Ok(EntryStatus {
                display,
                plaintext: paths::exists(&target),
                project_sidecar: paths::exists(&sidecar_path(&target)),
                backup: paths::exists(&store.backup_path(entry)?),
                remote: entry.remote_document().is_some(),
                target,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultHome;
    use secretvault_crypto::{encrypt_file, KEY_LENGTH};
    use secretvault_storage::MemoryDocumentStore;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        project: PathBuf,
        store: ManifestStore,
        key: VaultKey,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        fs::create_dir_all(&project).unwrap();
        let home = VaultHome::new(temp.path().join("home")).unwrap();
        let ctx = ProjectContext::from_dir(&project).unwrap();
        Fixture {
            store: ManifestStore::new(home, ctx),
            project,
            key: VaultKey::from_bytes([3u8; KEY_LENGTH]),
            _temp: temp,
        }
    }

    impl Fixture {
        fn lock(&self, rel: &str, content: &[u8]) -> PathBuf {
            let path = self.project.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            let encrypted = encrypt_file(&path, &self.key).unwrap().unwrap();
            self.store
                .upsert(&path, &encrypted.path, encrypted.original_mode)
                .unwrap();
            path
        }

        fn manifest(&self) -> VaultManifest {
            self.store.load().unwrap().0
        }
    }

    #[test]
    fn test_select_by_name_and_relative_path() {
        let f = fixture();
        let env = f.lock(".env", b"A=1");
        let nested = f.lock("infra/prod.tfvars", b"x=1");
        let ctx = f.store.context();

        let names = vec!["prod.tfvars".to_string(), "infra/prod.tfvars".to_string()];
        let selected = select_entries(ctx, &f.manifest(), &names, false);
        assert_eq!(selected.len(), 1);
        assert_eq!(PathBuf::from(&selected[0].absolute_path), nested);

        let names = vec![env.to_string_lossy().into_owned(), "missing".to_string()];
        let selected = select_entries(ctx, &f.manifest(), &names, false);
        assert_eq!(selected.len(), 1);
        assert_eq!(PathBuf::from(&selected[0].absolute_path), env);
    }

    #[test]
    fn test_select_empty_manifest() {
        let f = fixture();
        assert!(select_entries(f.store.context(), &f.manifest(), &[], true).is_empty());
    }

    #[test]
    fn test_local_source_order() {
        let f = fixture();
        let env = f.lock(".env", b"A=1");
        let entry = f.manifest().get(&env).unwrap().clone();
        let backup = f.store.backup_path(&entry).unwrap();

        let first = resolve_local_source(&f.store, &entry, &env).unwrap();
        assert_eq!(first, Some(sidecar_path(&env)));

        fs::remove_file(sidecar_path(&env)).unwrap();
        let fallback = resolve_local_source(&f.store, &entry, &env).unwrap();
        assert_eq!(fallback, Some(backup.clone()));

        fs::remove_file(&backup).unwrap();
        assert_eq!(resolve_local_source(&f.store, &entry, &env).unwrap(), None);
    }

    #[test]
    fn test_restore_from_sidecar_stamps_manifest() {
        let f = fixture();
        let env = f.lock(".env", b"A=1");
        let entries = select_entries(f.store.context(), &f.manifest(), &[], false);

        let outcome = Restorer::new(&f.store, Some(&f.key))
            .restore(&entries, false)
            .unwrap();

        assert_eq!(outcome.restored.len(), 1);
        assert_eq!(fs::read(&env).unwrap(), b"A=1");
        assert!(!f.manifest().get(&env).unwrap().last_restored_at.is_empty());
    }

    #[test]
    fn test_restore_skips_existing_without_force() {
        let f = fixture();
        let env = f.lock(".env", b"A=1");
        fs::write(&env, b"local edit").unwrap();
        let entries = select_entries(f.store.context(), &f.manifest(), &[], true);

        let outcome = Restorer::new(&f.store, Some(&f.key))
            .restore(&entries, false)
            .unwrap();
        assert_eq!(outcome.skipped, vec![env.clone()]);
        assert_eq!(fs::read(&env).unwrap(), b"local edit");

        let outcome = Restorer::new(&f.store, Some(&f.key))
            .restore(&entries, true)
            .unwrap();
        assert_eq!(outcome.restored.len(), 1);
        assert_eq!(fs::read(&env).unwrap(), b"A=1");
    }

    #[test]
    fn test_restore_without_key() {
        let f = fixture();
        f.lock(".env", b"A=1");
        let entries = select_entries(f.store.context(), &f.manifest(), &[], false);

        let result = Restorer::new(&f.store, None).restore(&entries, false);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_restore_from_remote_document() {
        let f = fixture();
        let env = f.lock(".env", b"A=1");
        let remote = MemoryDocumentStore::new();
        let doc = remote.insert("Private", "t", b"A=1").unwrap();
        f.store
            .annotate_remote(&env, "Private", &doc, "t", "sum")
            .unwrap();

        let entry = f.manifest().get(&env).unwrap().clone();
        fs::remove_file(sidecar_path(&env)).unwrap();
        fs::remove_file(f.store.backup_path(&entry).unwrap()).unwrap();

        let outcome = Restorer::new(&f.store, None)
            .with_remote(&remote)
            .restore(&[entry], false)
            .unwrap();

        assert_eq!(outcome.restored[0].1, RestoreSource::Remote(doc));
        assert_eq!(fs::read(&env).unwrap(), b"A=1");
    }

    #[test]
    fn test_restore_no_source() {
        let f = fixture();
        let env = f.lock(".env", b"A=1");
        let entry = f.manifest().get(&env).unwrap().clone();
        fs::remove_file(sidecar_path(&env)).unwrap();
        fs::remove_file(f.store.backup_path(&entry).unwrap()).unwrap();

        let result = Restorer::new(&f.store, Some(&f.key)).restore(&[entry], false);
        assert!(matches!(result, Err(ref e) if e.is_no_source()));
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_error_survives_failed_stamping() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture();
        let env = f.lock(".env", b"A=1");
        let key_file = f.lock("deploy.key", b"B=2");
        let manifest = f.manifest();
        let first = manifest.get(&env).unwrap().clone();
        let second = manifest.get(&key_file).unwrap().clone();
        fs::remove_file(sidecar_path(&key_file)).unwrap();
        fs::remove_file(f.store.backup_path(&second).unwrap()).unwrap();

        let vault_dir = f.store.manifest_path().parent().unwrap().to_path_buf();
        fs::set_permissions(&vault_dir, fs::Permissions::from_mode(0o500)).unwrap();
        if fs::write(vault_dir.join("write-check"), b"").is_ok() {
            // Permission bits are not enforced for this user.
            fs::set_permissions(&vault_dir, fs::Permissions::from_mode(0o700)).unwrap();
            return;
        }

        let result = Restorer::new(&f.store, Some(&f.key)).restore(&[first, second], false);
        fs::set_permissions(&vault_dir, fs::Permissions::from_mode(0o700)).unwrap();

        assert!(matches!(result, Err(ref e) if e.is_no_source()));
        assert_eq!(fs::read(&env).unwrap(), b"A=1");
    }

    #[test]
    fn test_status() {
        let f = fixture();
        let env = f.lock(".env", b"A=1");
        let manifest = f.manifest();

        let report = status(&f.store, &manifest).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].display, ".env");
        assert_eq!(report[0].target, env);
        assert!(!report[0].plaintext);
        assert!(report[0].project_sidecar);
        assert!(report[0].backup);
        assert!(!report[0].remote);
    }
}
