//! Common error types for SecretVault.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for SecretVault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem failure while discovering sensitive files.
    ///
    /// Discovery is fail-closed: the whole call aborts on the first failure.
    #[error("Discovery failed at {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Envelope is malformed, truncated, carries the wrong magic header or
    /// failed authentication. Deliberately generic.
    #[error("Invalid encrypted payload: {0}")]
    InvalidPayload(String),

    /// Cipher setup failed (e.g. wrong key length).
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Target already exists and overwriting was not requested.
    #[error("Target already exists: {0}")]
    TargetExists(PathBuf),

    /// Manifest could not be parsed or is otherwise unusable.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// No manifest entry is tracked for the given path.
    #[error("Vault entry not found for {0}")]
    EntryNotFound(PathBuf),

    /// A manifest entry has neither a backup reference nor a file id.
    #[error("Vault entry missing file id")]
    MissingFileId,

    /// Temp-file creation, write, chmod or rename failed. The target is untouched.
    #[error("Atomic write to {path} failed: {source}")]
    AtomicWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Neither a local ciphertext nor a remote document is available.
    #[error("No encrypted source available for {0}")]
    NoSourceAvailable(PathBuf),

    /// Path does not carry the ciphertext suffix.
    #[error("Not an encrypted file: {0}")]
    NotEncrypted(PathBuf),

    /// Remote document store collaborator failed.
    #[error("Remote document store error: {0}")]
    Remote(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O failure with the operation and path that caused it.
    #[error("Failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Bare(#[from] std::io::Error),
}

impl Error {
    /// Wrap an I/O error with the operation and path it belongs to.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// True when the caller may retry the same operation with force.
    pub fn is_target_exists(&self) -> bool {
        matches!(self, Self::TargetExists(_))
    }

    /// True when no local ciphertext was found and the remote store should be consulted.
    pub fn is_no_source(&self) -> bool {
        matches!(self, Self::NoSourceAvailable(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
