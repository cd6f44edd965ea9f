//! Common types used throughout SecretVault.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use crate::paths;

/// Number of SHA-256 bytes kept for a project id (16 hex characters).
const PROJECT_ID_BYTES: usize = 8;

/// Identity of the project the tool is invoked in.
///
/// Recomputed on every invocation from the working directory; never persisted
/// on its own, though its id and path are embedded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectContext {
    project_path: PathBuf,
    project_id: String,
    key_id: String,
}

impl ProjectContext {
    /// Build the context for a project rooted at `dir`.
    ///
    /// # Postconditions
    /// - `project_path` is absolute and lexically clean
    /// - `project_id` is the first 8 bytes of SHA-256(project_path), hex encoded
    /// - `key_id` is `project-<project_id>`
    ///
    /// # Errors
    /// - The current directory cannot be read (relative `dir` only)
    pub fn from_dir(dir: impl AsRef<Path>) -> crate::Result<Self> {
        let project_path = paths::absolutize(dir)?;
        let digest = Sha256::digest(project_path.as_os_str().as_encoded_bytes());
        let project_id = hex::encode(&digest[..PROJECT_ID_BYTES]);
        let key_id = format!("project-{}", project_id);
        Ok(Self {
            project_path,
            project_id,
            key_id,
        })
    }

    /// Build the context for the current working directory.
    pub fn current() -> crate::Result<Self> {
        Self::from_dir(".")
    }

    /// Absolute project root.
    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    /// Stable 16-hex-character project id.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Identifier under which the project's key is stored.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Path of `absolute` relative to the project root, if it lies inside it.
    pub fn relative_path(&self, absolute: &Path) -> Option<PathBuf> {
        paths::relative_to(&self.project_path, absolute)
    }
}

impl fmt::Display for ProjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.project_path.display(), self.project_id)
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}
