//! Classifier rule tables and the vault-home layout.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use secretvault_common::{paths, Error, Result};
use secretvault_crypto::ENCRYPTED_EXT;

/// Environment variable overriding the vault home.
pub const HOME_ENV: &str = "SECRETVAULT_HOME";

/// Vault home directory name under the user's home.
pub const DEFAULT_HOME_DIR: &str = ".secretvault";

/// Manifest file name inside a project directory.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Advisory lock file guarding the manifest.
pub const MANIFEST_LOCK_FILENAME: &str = "manifest.json.lock";

/// File-based key store name inside a project directory.
pub const KEY_FILENAME: &str = "keyring-fallback.key";

/// Permission bits for every directory created under the vault home.
pub const DIR_MODE: u32 = 0o700;

/// Permission bits for the manifest and backup copies.
pub const FILE_MODE: u32 = 0o600;

/// Immutable rule set driving sensitive-file classification.
///
/// Name, suffix and directory tables are matched case-insensitively.
/// Fields missing from a JSON rules file fall back to the built-in tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
    /// Exact basenames that are always sensitive.
    pub sensitive_names: Vec<String>,
    /// Basename prefix for dotenv-style overlays.
    pub env_prefix: String,
    /// Basename suffixes that are always sensitive.
    pub sensitive_suffixes: Vec<String>,
    /// Directory names that make everything beneath them sensitive.
    pub sensitive_dirs: Vec<String>,
    /// Directory names pruned from traversal.
    pub ignored_dirs: Vec<String>,
    /// Regular expression run over the start of a file.
    pub content_pattern: String,
    /// Files larger than this are never classified by content.
    pub max_content_size: u64,
    /// Number of leading bytes inspected by the content pattern.
    pub sniff_len: usize,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            sensitive_names: owned(&[
                ".env",
                ".envrc",
                "terraform.tfvars",
                "terraform.tfvars.json",
                "id_rsa",
                "id_ed25519",
                "id_dsa",
                "credentials",
                "credentials.json",
                "secrets.yml",
                "secrets.yaml",
                "secrets.json",
                ".npmrc",
                ".pypirc",
            ]),
            env_prefix: ".env.".to_string(),
            sensitive_suffixes: owned(&[
                ".tfvars",
                ".tfvars.json",
                ".pem",
                ".key",
                ".p12",
                ".pfx",
                ".jks",
                ".keystore",
                ".ovpn",
                ".asc",
                ".gpg",
                ".kubeconfig",
            ]),
            sensitive_dirs: owned(&["secrets", "private", "credentials", ".aws", ".ssh", ".gnupg"]),
            ignored_dirs: owned(&[
                ".git",
                ".terraform",
                ".svn",
                ".hg",
                "node_modules",
                "dist",
                "build",
                "vendor",
                ".next",
                ".nuxt",
                ".idea",
                ".vscode",
                ".ai-sessions",
            ]),
            content_pattern: r"(?i)(api[_-]?key|token|password|private[_-]?key|secret[_-]?(key|token|value))\s*[:=]|aws_secret_access_key|-----BEGIN (RSA|EC|OPENSSH|PGP) PRIVATE KEY-----".to_string(),
            max_content_size: 1 << 20,
            sniff_len: 4096,
        }
    }
}

impl ClassifierRules {
    /// Serialize rules to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize rules from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load rules from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| Error::io("read rules", path, e))?;
        Self::from_json(&json)
    }
}

/// Root directory holding every project's manifest, backups and key file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultHome {
    root: PathBuf,
}

impl VaultHome {
    /// Use `root` as the vault home. Relative paths are made absolute.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            root: paths::absolutize(root)?,
        })
    }

    /// Resolve the vault home from `SECRETVAULT_HOME`, else `~/.secretvault`.
    ///
    /// # Errors
    /// - `NotFound` if no override is set and the home directory is unknown
    pub fn from_env() -> Result<Self> {
        if let Ok(value) = std::env::var(HOME_ENV) {
            if !value.trim().is_empty() {
                return Self::new(value.trim());
            }
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::NotFound("user home directory".to_string()))?;
        Self::new(home.join(DEFAULT_HOME_DIR))
    }

    /// The vault home itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `projects/<project-id>`.
    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join("projects").join(project_id)
    }

    /// `projects/<project-id>/manifest.json`.
    pub fn manifest_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(MANIFEST_FILENAME)
    }

    /// `projects/<project-id>/manifest.json.lock`.
    pub fn manifest_lock_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(MANIFEST_LOCK_FILENAME)
    }

    /// `projects/<project-id>/keyring-fallback.key`.
    pub fn key_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(KEY_FILENAME)
    }

    /// Absolute form of a backup reference stored in the manifest.
    pub fn backup_path(&self, project_id: &str, vault_file: &str) -> PathBuf {
        self.project_dir(project_id).join(vault_file)
    }
}

/// Manifest-relative backup reference for a file id: `files/<id[0:2]>/<id>.svault`.
///
/// # Errors
/// - `MissingFileId` if `file_id` is shorter than two characters
pub fn backup_reference(file_id: &str) -> Result<String> {
    let shard = file_id.get(..2).ok_or(Error::MissingFileId)?;
    Ok(format!("files/{}/{}{}", shard, file_id, ENCRYPTED_EXT))
}

/// Create `dir` and its parents with mode 0700.
pub fn create_private_dir(dir: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder
        .create(dir)
        .map_err(|e| Error::io("create directory", dir, e))
}
