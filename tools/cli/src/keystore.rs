//! File-based project key store.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use secretvault_common::{write_atomic, ProjectContext};
use secretvault_crypto::VaultKey;
use secretvault_vault::config::{create_private_dir, FILE_MODE};
use secretvault_vault::VaultHome;

/// Environment variable carrying a base64 key that overrides the store.
pub const KEY_ENV: &str = "SECRETVAULT_KEY";

/// Base64 key file under the project's vault directory.
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn for_project(home: &VaultHome, ctx: &ProjectContext) -> Self {
        Self {
            path: home.key_path(ctx.project_id()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The project key: `SECRETVAULT_KEY` if set, else the key file, else `None`.
    pub fn load(&self) -> Result<Option<VaultKey>> {
        if let Ok(value) = std::env::var(KEY_ENV) {
            if !value.trim().is_empty() {
                let key = VaultKey::from_base64(&value)
                    .with_context(|| format!("{} is not a valid key", KEY_ENV))?;
                return Ok(Some(key));
            }
        }
        self.load_file()
    }

    /// The key file's content, ignoring the environment.
    pub fn load_file(&self) -> Result<Option<VaultKey>> {
        let encoded = match fs::read_to_string(&self.path) {
            Ok(encoded) => zeroize::Zeroizing::new(encoded),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        let key = VaultKey::from_base64(&encoded)
            .with_context(|| format!("Stored key at {} is invalid", self.path.display()))?;
        Ok(Some(key))
    }

    /// Write the key file with mode 0600.
    pub fn save(&self, key: &VaultKey) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            create_private_dir(parent)?;
        }
        write_atomic(&self.path, key.to_base64().as_bytes(), FILE_MODE)
            .context("Failed to store key")?;
        Ok(())
    }

    /// Remove the key file. Returns false if there was none.
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> KeyStore {
        let home = VaultHome::new(temp.path().join("home")).unwrap();
        let ctx = ProjectContext::from_dir(temp.path().join("project")).unwrap();
        KeyStore::for_project(&home, &ctx)
    }

    #[test]
    fn test_save_load_clear() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let key = VaultKey::generate();

        store.save(&key).unwrap();
        let loaded = store.load_file().unwrap().unwrap();
        assert_eq!(loaded.as_bytes(), key.as_bytes());

        assert!(store.clear().unwrap());
        assert!(store.load_file().unwrap().is_none());
        assert!(!store.clear().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_mode() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.save(&VaultKey::generate()).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_corrupt_key_file() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        create_private_dir(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "not base64!").unwrap();

        assert!(store.load_file().is_err());
    }
}
