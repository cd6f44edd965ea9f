//! Per-project manifest model.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::backup_reference;
use secretvault_common::{ProjectContext, Result};

/// Current manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

/// RFC 3339 UTC timestamp with second precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Content-addressed entry id: SHA-256 of the absolute original path, hex encoded.
///
/// Depends on the path only, so re-locking a file always reuses its backup slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Id for an absolute path.
    pub fn for_path(absolute: &Path) -> Self {
        let digest = Sha256::digest(absolute.as_os_str().as_encoded_bytes());
        Self(hex::encode(digest))
    }

    /// Hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for ids read from manifests that lack one.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Backup reference relative to the project's vault directory.
    pub fn backup_reference(&self) -> Result<String> {
        backup_reference(&self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a remote copy of an entry lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocument<'a> {
    pub vault: &'a str,
    pub document_id: &'a str,
    pub title: &'a str,
    pub checksum_sha256: &'a str,
    pub absorbed_at: &'a str,
}

/// One tracked file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    #[serde(default)]
    pub file_id: FileId,
    #[serde(default)]
    pub absolute_path: String,
    /// Empty when the file lies outside the project root.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub relative_path: String,
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub filename: String,
    /// Backup reference relative to the project's vault directory.
    #[serde(default)]
    pub vault_file: String,
    /// Absolute path of the sidecar written next to the original.
    #[serde(default)]
    pub project_encrypted_file: String,
    #[serde(default)]
    pub locked_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_restored_at: String,
    #[serde(default)]
    pub original_mode: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub onepassword_vault: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub onepassword_document: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub onepassword_title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum_sha256: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub absorbed_at: String,
}

impl VaultEntry {
    /// Entry for a freshly locked file, with no remote provenance.
    pub fn locked(
        ctx: &ProjectContext,
        absolute: &Path,
        encrypted: &Path,
        original_mode: u32,
    ) -> Result<Self> {
        let file_id = FileId::for_path(absolute);
        let vault_file = file_id.backup_reference()?;
        let display = |p: &Path| p.to_string_lossy().into_owned();
        Ok(Self {
            vault_file,
            file_id,
            absolute_path: display(absolute),
            relative_path: ctx
                .relative_path(absolute)
                .map(|p| display(&p))
                .unwrap_or_default(),
            directory: absolute.parent().map(display).unwrap_or_default(),
            filename: absolute
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            project_encrypted_file: display(encrypted),
            locked_at: timestamp(),
            original_mode: original_mode & 0o777,
            ..Default::default()
        })
    }

    /// Remote copy, if one was recorded.
    pub fn remote_document(&self) -> Option<RemoteDocument<'_>> {
        if self.onepassword_document.trim().is_empty() {
            return None;
        }
        Some(RemoteDocument {
            vault: &self.onepassword_vault,
            document_id: &self.onepassword_document,
            title: &self.onepassword_title,
            checksum_sha256: &self.checksum_sha256,
            absorbed_at: &self.absorbed_at,
        })
    }

    /// Record a remote copy.
    pub fn set_remote(&mut self, vault: &str, document_id: &str, title: &str, checksum: &str) {
        self.onepassword_vault = vault.to_string();
        self.onepassword_document = document_id.to_string();
        self.onepassword_title = title.to_string();
        self.checksum_sha256 = checksum.to_string();
        self.absorbed_at = timestamp();
    }

    /// Forget the remote copy.
    pub fn clear_remote(&mut self) {
        self.onepassword_vault.clear();
        self.onepassword_document.clear();
        self.onepassword_title.clear();
        self.checksum_sha256.clear();
        self.absorbed_at.clear();
    }

    /// Path the plaintext should be restored to.
    ///
    /// Precedence: project-relative path under the project root, then the
    /// stored absolute path, then the bare filename under the project root.
    pub fn target_path(&self, ctx: &ProjectContext) -> PathBuf {
        if !self.relative_path.trim().is_empty() {
            return ctx.project_path().join(&self.relative_path);
        }
        if !self.absolute_path.trim().is_empty() {
            return PathBuf::from(&self.absolute_path);
        }
        ctx.project_path().join(&self.filename)
    }
}

/// Per-project tracked-file state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultManifest {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub project_path: String,
    #[serde(default)]
    pub updated_at: String,
    /// Keyed by absolute original path. Iterate via [`VaultManifest::sorted_keys`].
    #[serde(default, deserialize_with = "null_as_empty")]
    pub entries: HashMap<String, VaultEntry>,
}

/// `"entries": null` reads as an empty map.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, VaultEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

impl VaultManifest {
    /// Empty manifest for a project.
    pub fn new(ctx: &ProjectContext) -> Self {
        Self {
            version: MANIFEST_VERSION,
            project_id: ctx.project_id().to_string(),
            project_path: ctx.project_path().to_string_lossy().into_owned(),
            updated_at: timestamp(),
            entries: HashMap::new(),
        }
    }

    /// Fill fields older manifests may lack, including each entry's
    /// `absolute_path` from its key.
    pub fn backfill(&mut self, ctx: &ProjectContext) {
        if self.version == 0 {
            self.version = MANIFEST_VERSION;
        }
        if self.project_id.trim().is_empty() {
            self.project_id = ctx.project_id().to_string();
        }
        if self.project_path.trim().is_empty() {
            self.project_path = ctx.project_path().to_string_lossy().into_owned();
        }
        // The key is the absolute path; entries are addressed by it afterwards.
        for (key, entry) in self.entries.iter_mut() {
            if entry.absolute_path.trim().is_empty() {
                entry.absolute_path = key.clone();
            }
        }
    }

    /// Entry keys in lexicographic order.
    pub fn sorted_keys(&self) -> Vec<&String> {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        keys
    }

    /// Entries in key order.
    pub fn sorted_entries(&self) -> impl Iterator<Item = &VaultEntry> {
        self.sorted_keys().into_iter().filter_map(move |k| self.entries.get(k))
    }

    /// Entry tracked for an absolute path.
    pub fn get(&self, absolute: &Path) -> Option<&VaultEntry> {
        self.entries.get(absolute.to_string_lossy().as_ref())
    }

    /// Insert or replace the entry keyed by its absolute path.
    pub fn insert(&mut self, entry: VaultEntry) {
        self.entries.insert(entry.absolute_path.clone(), entry);
    }

    /// Stamp the last-updated time.
    pub fn touch(&mut self) {
        self.updated_at = timestamp();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ProjectContext {
        ProjectContext::from_dir("/work/app").unwrap()
    }

    #[test]
    fn test_file_id_is_path_hash() {
        let a = FileId::for_path(Path::new("/work/app/.env"));
        let b = FileId::for_path(Path::new("/work/app/.env"));
        let c = FileId::for_path(Path::new("/work/app/.env.local"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(
            a.backup_reference().unwrap(),
            format!("files/{}/{}.svault", &a.as_str()[..2], a)
        );
    }

    #[test]
    fn test_locked_entry_fields() {
        let entry = VaultEntry::locked(
            &ctx(),
            Path::new("/work/app/infra/prod.tfvars"),
            Path::new("/work/app/infra/prod.tfvars.svault"),
            0o100640,
        )
        .unwrap();

        assert_eq!(entry.relative_path, "infra/prod.tfvars");
        assert_eq!(entry.directory, "/work/app/infra");
        assert_eq!(entry.filename, "prod.tfvars");
        assert_eq!(entry.original_mode, 0o640);
        assert!(entry.remote_document().is_none());
    }

    #[test]
    fn test_target_path_precedence() {
        let ctx = ctx();
        let mut entry = VaultEntry {
            relative_path: "a/.env".to_string(),
            absolute_path: "/elsewhere/.env".to_string(),
            filename: ".env".to_string(),
            ..Default::default()
        };
        assert_eq!(entry.target_path(&ctx), PathBuf::from("/work/app/a/.env"));

        entry.relative_path.clear();
        assert_eq!(entry.target_path(&ctx), PathBuf::from("/elsewhere/.env"));

        entry.absolute_path.clear();
        assert_eq!(entry.target_path(&ctx), PathBuf::from("/work/app/.env"));
    }

    #[test]
    fn test_remote_roundtrip() {
        let mut entry = VaultEntry::default();
        entry.set_remote("Private", "doc-1", "secretvault x .env", "abc");

        let remote = entry.remote_document().unwrap();
        assert_eq!(remote.document_id, "doc-1");
        assert!(!remote.absorbed_at.is_empty());

        entry.clear_remote();
        assert!(entry.remote_document().is_none());
        assert!(entry.absorbed_at.is_empty());
    }

    #[test]
    fn test_legacy_manifest_backfill() {
        let json = r#"{"entries": {"/work/app/.env": {"file_id": "ab", "absolute_path": "/work/app/.env"}}}"#;
        let mut manifest: VaultManifest = serde_json::from_str(json).unwrap();
        manifest.backfill(&ctx());

        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert_eq!(manifest.project_id, ctx().project_id());
        assert_eq!(manifest.project_path, "/work/app");
        assert!(manifest.get(Path::new("/work/app/.env")).is_some());
    }

    #[test]
    fn test_backfill_entry_path_from_key() {
        let json = r#"{"entries": {"/work/app/.env": {"onepassword_document": "doc-1"}}}"#;
        let mut manifest: VaultManifest = serde_json::from_str(json).unwrap();
        manifest.backfill(&ctx());

        let entry = manifest.get(Path::new("/work/app/.env")).unwrap();
        assert_eq!(entry.absolute_path, "/work/app/.env");
        assert_eq!(entry.target_path(&ctx()), PathBuf::from("/work/app/.env"));
    }

    #[test]
    fn test_null_entries_read_as_empty() {
        let manifest: VaultManifest =
            serde_json::from_str(r#"{"version": 1, "entries": null}"#).unwrap();
        assert!(manifest.is_empty());

        let manifest: VaultManifest = serde_json::from_str(r#"{"version": 1}"#).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_optional_fields_omitted() {
        let entry = VaultEntry::locked(
            &ctx(),
            Path::new("/outside/.env"),
            Path::new("/outside/.env.svault"),
            0o600,
        )
        .unwrap();
        let json = serde_json::to_string(&entry).unwrap();

        assert!(!json.contains("relative_path"));
        assert!(!json.contains("onepassword_document"));
        assert!(json.contains("\"vault_file\""));
    }

    #[test]
    fn test_sorted_keys() {
        let mut manifest = VaultManifest::new(&ctx());
        for path in ["/work/app/c", "/work/app/a", "/work/app/b"] {
            manifest.insert(VaultEntry {
                absolute_path: path.to_string(),
                ..Default::default()
            });
        }

        let keys: Vec<&str> = manifest.sorted_keys().into_iter().map(String::as_str).collect();
        assert_eq!(keys, vec!["/work/app/a", "/work/app/b", "/work/app/c"]);
    }
}
