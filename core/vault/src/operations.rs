//! Lock, unlock, absorb and cleanup flows built on the store and classifier.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::classifier::Classifier;
use crate::manifest::VaultEntry;
use crate::store::ManifestStore;
use secretvault_common::{paths, Error, ProjectContext, Result};
use secretvault_crypto::{decrypt_file, encrypt_file, VaultKey};
use secretvault_storage::{DocumentMetadata, DocumentStore};

/// Files a lock run should encrypt.
///
/// Discovery results plus every tracked entry whose plaintext currently
/// exists, so files tracked earlier are shielded again even if the rules no
/// longer match them. Sorted and deduplicated.
pub fn lock_targets(
    classifier: &Classifier,
    store: &ManifestStore,
    roots: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let mut targets: BTreeSet<PathBuf> = classifier
        .find_sensitive(roots)?
        .into_iter()
        .filter(|p| paths::exists(p))
        .collect();

    let (manifest, _) = store.load()?;
    for entry in manifest.sorted_entries() {
        let target = entry.target_path(store.context());
        if paths::exists(&target) {
            targets.insert(target);
        }
    }
    Ok(targets.into_iter().collect())
}

/// Encrypt one file in place and track it.
///
/// Returns `None` if the path is already a ciphertext.
pub fn lock_file(store: &ManifestStore, key: &VaultKey, path: &Path) -> Result<Option<VaultEntry>> {
    let Some(encrypted) = encrypt_file(path, key)? else {
        return Ok(None);
    };
    let entry = store.upsert(path, &encrypted.path, encrypted.original_mode)?;
    info!(path = %path.display(), "locked");
    Ok(Some(entry))
}

/// Result of an unlock run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UnlockOutcome {
    /// Plaintext paths written.
    pub unlocked: Vec<PathBuf>,
    /// Ciphertexts left alone because their plaintext already exists.
    pub skipped: Vec<PathBuf>,
}

/// Decrypt each ciphertext in place.
///
/// A ciphertext whose plaintext already exists is skipped: the plaintext is
/// treated as the newer copy.
///
/// # Errors
/// - The first decryption failure other than an existing plaintext
pub fn unlock_files(key: &VaultKey, encrypted: &[PathBuf]) -> Result<UnlockOutcome> {
    let mut outcome = UnlockOutcome::default();
    for path in encrypted {
        match decrypt_file(path, key) {
            Ok(plain) => {
                info!(path = %plain.display(), "unlocked");
                outcome.unlocked.push(plain);
            }
            Err(Error::TargetExists(plain)) => {
                warn!(path = %plain.display(), "plaintext exists, leaving ciphertext");
                outcome.skipped.push(path.clone());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(outcome)
}

/// Document title: `secretvault <project-id> <relative path or basename>`.
pub fn title_for_path(ctx: &ProjectContext, absolute: &Path) -> String {
    let name = ctx
        .relative_path(absolute)
        .unwrap_or_else(|| absolute.file_name().map(PathBuf::from).unwrap_or_default());
    format!("secretvault {} {}", ctx.project_id(), name.display())
}

/// SHA-256 of a file's content, hex encoded.
pub fn file_sha256(path: &Path) -> Result<String> {
    let data = zeroize::Zeroizing::new(fs::read(path).map_err(|e| Error::io("read", path, e))?);
    Ok(hex::encode(Sha256::digest(data.as_slice())))
}

/// Upload a plaintext file to `remote`, then lock it and record provenance.
///
/// # Errors
/// - Upload failure leaves the file untouched
/// - Lock or tracking failure after a successful upload leaves an orphan
///   remote document
pub fn absorb_file(
    store: &ManifestStore,
    key: &VaultKey,
    remote: &dyn DocumentStore,
    vault: &str,
    path: &Path,
) -> Result<VaultEntry> {
    let path = paths::absolutize(path)?;
    let ctx = store.context();
    let title = title_for_path(ctx, &path);
    let checksum = file_sha256(&path)?;
    let metadata = DocumentMetadata::for_path(ctx, &path);

    let document_id = remote.upload(&path, vault, &title, &metadata)?;
    lock_file(store, key, &path)?;
    let entry = store.annotate_remote(&path, vault, &document_id, &title, &checksum)?;

    info!(path = %path.display(), store = remote.name(), "absorbed");
    Ok(entry)
}

/// Result of a cleanup run.
#[derive(Debug, Default)]
pub struct CleanupOutcome {
    /// Document ids deleted.
    pub deleted: Vec<String>,
    /// Document ids that could not be deleted, with the reason.
    pub failed: Vec<(String, Error)>,
}

/// Entries that carry a remote copy, in key order.
pub fn cleanup_targets(store: &ManifestStore) -> Result<Vec<VaultEntry>> {
    let (manifest, _) = store.load()?;
    Ok(manifest
        .sorted_entries()
        .filter(|e| e.remote_document().is_some())
        .cloned()
        .collect())
}

/// Delete every remote copy of the project and forget them in the manifest.
///
/// Deletion failures are collected rather than aborting the loop. The
/// manifest is saved once, covering only the documents actually deleted.
pub fn cleanup_remote(store: &ManifestStore, remote: &dyn DocumentStore) -> Result<CleanupOutcome> {
    let mut outcome = CleanupOutcome::default();
    let mut cleared = Vec::new();

    for entry in cleanup_targets(store)? {
        let Some(doc) = entry.remote_document() else {
            continue;
        };
        let vault = Some(doc.vault).filter(|v| !v.trim().is_empty());
        match remote.delete(doc.document_id, vault) {
            Ok(()) => {
                info!(document = doc.document_id, "deleted remote document");
                outcome.deleted.push(doc.document_id.to_string());
                cleared.push(entry.absolute_path.clone());
            }
            Err(e) => {
                warn!(document = doc.document_id, error = %e, "remote delete failed");
                outcome.failed.push((doc.document_id.to_string(), e));
            }
        }
    }

    store.clear_remote(&cleared)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassifierRules, VaultHome};
    use secretvault_crypto::file::sidecar_path;
    use secretvault_crypto::KEY_LENGTH;
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
        Fixture {
            store: ManifestStore::new(home, ProjectContext::from_dir(&project).unwrap()),
            project,
            key: VaultKey::from_bytes([9u8; KEY_LENGTH]),
            _temp: temp,
        }
    }

    #[test]
    fn test_lock_targets_include_tracked_files() {
        let f = fixture();
        let classifier = Classifier::new(&ClassifierRules::default()).unwrap();
        let env = f.project.join(".env");
        let notes = f.project.join("notes.txt");
        fs::write(&env, b"A=1").unwrap();
        fs::write(&notes, b"harmless").unwrap();

        // Track a file the rules do not match, then bring its plaintext back.
        fs::write(sidecar_path(&notes), b"x").unwrap();
        f.store.upsert(&notes, &sidecar_path(&notes), 0o600).unwrap();

        let targets = lock_targets(&classifier, &f.store, &[f.project.clone()]).unwrap();
        assert_eq!(targets, vec![env, notes]);
    }

    #[test]
    fn test_lock_file_tracks_entry() {
        let f = fixture();
        let env = f.project.join(".env");
        fs::write(&env, b"A=1").unwrap();

        let entry = lock_file(&f.store, &f.key, &env).unwrap().unwrap();
        assert!(!env.exists());
        assert!(sidecar_path(&env).exists());
        assert!(f.store.backup_path(&entry).unwrap().exists());

        assert!(lock_file(&f.store, &f.key, &sidecar_path(&env))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unlock_skips_existing_plaintext() {
        let f = fixture();
        let a = f.project.join("a.pem");
        let b = f.project.join("b.pem");
        fs::write(&a, b"A").unwrap();
        fs::write(&b, b"B").unwrap();
        lock_file(&f.store, &f.key, &a).unwrap();
        lock_file(&f.store, &f.key, &b).unwrap();
        fs::write(&b, b"newer").unwrap();

        let outcome =
            unlock_files(&f.key, &[sidecar_path(&a), sidecar_path(&b)]).unwrap();

        assert_eq!(outcome.unlocked, vec![a.clone()]);
        assert_eq!(outcome.skipped, vec![sidecar_path(&b)]);
        assert_eq!(fs::read(&b).unwrap(), b"newer");
    }

    #[test]
    fn test_title_for_path() {
        let ctx = ProjectContext::from_dir("/work/app").unwrap();
        assert_eq!(
            title_for_path(&ctx, Path::new("/work/app/infra/.env")),
            format!("secretvault {} infra/.env", ctx.project_id())
        );
        assert_eq!(
            title_for_path(&ctx, Path::new("/elsewhere/.env")),
            format!("secretvault {} .env", ctx.project_id())
        );
    }

    #[test]
    fn test_absorb_then_cleanup() {
        let f = fixture();
        let remote = MemoryDocumentStore::new();
        let env = f.project.join(".env");
        fs::write(&env, b"TOKEN=1").unwrap();

        let entry = absorb_file(&f.store, &f.key, &remote, "Private", &env).unwrap();
        let doc = entry.remote_document().unwrap();
        assert_eq!(doc.checksum_sha256, hex::encode(Sha256::digest(b"TOKEN=1")));
        assert_eq!(
            remote.get(doc.document_id).unwrap().unwrap().data,
            b"TOKEN=1"
        );
        assert!(!env.exists());

        let outcome = cleanup_remote(&f.store, &remote).unwrap();
        assert_eq!(outcome.deleted.len(), 1);
        assert!(outcome.failed.is_empty());
        assert!(remote.is_empty());
        assert!(cleanup_targets(&f.store).unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_counts_failures() {
        let f = fixture();
        let remote = MemoryDocumentStore::new();
        let env = f.project.join(".env");
        fs::write(&env, b"TOKEN=1").unwrap();
        absorb_file(&f.store, &f.key, &remote, "Private", &env).unwrap();

        remote.set_available(false);
        let outcome = cleanup_remote(&f.store, &remote).unwrap();

        assert!(outcome.deleted.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(cleanup_targets(&f.store).unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_entry_without_absolute_path() {
        let f = fixture();
        let remote = MemoryDocumentStore::new();
        let doc = remote.insert("Private", "legacy", b"TOKEN=1").unwrap();
        let key = f.project.join(".env").to_string_lossy().into_owned();
        let mut entries = serde_json::Map::new();
        entries.insert(
            key.clone(),
            serde_json::json!({ "onepassword_vault": "Private", "onepassword_document": doc.clone() }),
        );
        let manifest = serde_json::json!({ "version": 1, "entries": entries });
        let path = f.store.manifest_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_json::to_vec(&manifest).unwrap()).unwrap();

        let outcome = cleanup_remote(&f.store, &remote).unwrap();

        assert_eq!(outcome.deleted, vec![doc]);
        assert!(remote.is_empty());
        assert!(cleanup_targets(&f.store).unwrap().is_empty());
        let (manifest, _) = f.store.load().unwrap();
        assert!(manifest.entries[&key].remote_document().is_none());
    }

    #[test]
    fn test_absorb_upload_failure_leaves_file() {
        let f = fixture();
        let remote = MemoryDocumentStore::new();
        remote.set_available(false);
        let env = f.project.join(".env");
        fs::write(&env, b"TOKEN=1").unwrap();

        assert!(absorb_file(&f.store, &f.key, &remote, "Private", &env).is_err());
        assert!(env.exists());
        assert!(f.store.load().unwrap().0.is_empty());
    }
}
