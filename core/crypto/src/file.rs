//! File-level encryption on top of the envelope codec.
//!
//! Locking replaces `name` with `name.svault`; unlocking does the reverse.
//! The new file is always written atomically before the old one is removed,
//! so an interruption can leave both copies but never a truncated one.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::envelope::{self, ENCRYPTED_EXT};
use crate::keys::VaultKey;
use secretvault_common::{paths, write_atomic, Error, Result};

/// Permission bits used when neither the envelope nor the manifest has any.
pub const DEFAULT_MODE: u32 = 0o600;

/// Permission bits of every ciphertext written by this crate.
pub const CIPHERTEXT_MODE: u32 = 0o600;

/// Result of locking a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFile {
    /// Path of the ciphertext sidecar.
    pub path: PathBuf,
    /// Permission bits of the plaintext that was replaced.
    pub original_mode: u32,
}

/// True if the file name ends with the ciphertext suffix (case-insensitive).
pub fn is_encrypted_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ENCRYPTED_EXT.trim_start_matches('.')))
}

/// `path` with the ciphertext suffix appended to its file name.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(ENCRYPTED_EXT);
    PathBuf::from(raw)
}

/// `path` with the ciphertext suffix removed, if it has one.
pub fn plaintext_path(path: &Path) -> Option<PathBuf> {
    if !is_encrypted_path(path) {
        return None;
    }
    path.file_stem().map(|stem| path.with_file_name(stem))
}

/// Permission bits of an existing file.
#[cfg(unix)]
pub fn file_mode(path: &Path) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(path).map_err(|e| Error::io("stat", path, e))?;
    Ok(meta.permissions().mode() & 0o777)
}

/// Permission bits of an existing file.
#[cfg(not(unix))]
pub fn file_mode(path: &Path) -> Result<u32> {
    let meta = fs::metadata(path).map_err(|e| Error::io("stat", path, e))?;
    Ok(if meta.permissions().readonly() { 0o400 } else { 0o600 })
}

/// Replace a plaintext file with its encrypted sidecar.
///
/// # Postconditions
/// - Returns `Ok(None)` without touching anything if `path` already carries
///   the ciphertext suffix
/// - Otherwise `path + ".svault"` holds an envelope of the old content with
///   mode 0600 and `path` no longer exists
///
/// # Errors
/// - Plaintext cannot be read or removed
/// - Atomic write of the sidecar failed (plaintext is then left in place)
pub fn encrypt_file(path: &Path, key: &VaultKey) -> Result<Option<EncryptedFile>> {
    if is_encrypted_path(path) {
        debug!(path = %path.display(), "already encrypted, skipping");
        return Ok(None);
    }

    let plaintext = zeroize::Zeroizing::new(fs::read(path).map_err(|e| Error::io("read", path, e))?);
    let original_mode = file_mode(path)?;
    let payload = envelope::seal(&plaintext, key, original_mode)?;

    let dst = sidecar_path(path);
    write_atomic(&dst, &payload, CIPHERTEXT_MODE)?;
    fs::remove_file(path).map_err(|e| Error::io("remove plaintext", path, e))?;

    debug!(path = %path.display(), "encrypted");
    Ok(Some(EncryptedFile {
        path: dst,
        original_mode,
    }))
}

/// Replace an encrypted sidecar with its plaintext.
///
/// # Errors
/// - `NotEncrypted` if `path` lacks the ciphertext suffix
/// - `TargetExists` if the plaintext path is already occupied; the plaintext
///   is treated as the newer copy and is never overwritten here
/// - `InvalidPayload` if the envelope fails to open
pub fn decrypt_file(path: &Path, key: &VaultKey) -> Result<PathBuf> {
    let dst = plaintext_path(path).ok_or_else(|| Error::NotEncrypted(path.to_path_buf()))?;
    if paths::exists(&dst) {
        return Err(Error::TargetExists(dst));
    }

    let payload = fs::read(path).map_err(|e| Error::io("read", path, e))?;
    let (plaintext, mode) = envelope::open(&payload, key)?;
    let mode = if mode == 0 { DEFAULT_MODE } else { mode };

    write_atomic(&dst, plaintext.as_bytes(), mode)?;
    fs::remove_file(path).map_err(|e| Error::io("remove ciphertext", path, e))?;

    debug!(path = %dst.display(), "decrypted");
    Ok(dst)
}

/// Decrypt `source` into `target` without consuming the source.
///
/// Mode recovery: the envelope's bits, else `fallback_mode`, else 0600.
///
/// # Errors
/// - `TargetExists` if `target` exists and `force` is false; checked before
///   the source is read
/// - `InvalidPayload` if the envelope fails to open
pub fn restore_plaintext(
    source: &Path,
    target: &Path,
    key: &VaultKey,
    fallback_mode: u32,
    force: bool,
) -> Result<()> {
    if paths::exists(target) && !force {
        return Err(Error::TargetExists(target.to_path_buf()));
    }

    let payload = fs::read(source).map_err(|e| Error::io("read", source, e))?;
    let (plaintext, mut mode) = envelope::open(&payload, key)?;
    if mode == 0 {
        mode = fallback_mode;
    }
    if mode == 0 {
        mode = DEFAULT_MODE;
    }

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| Error::io("create directory", parent, e))?;
        }
    }
    write_atomic(target, plaintext.as_bytes(), mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;
    use tempfile::TempDir;

    fn key() -> VaultKey {
        VaultKey::from_bytes([7u8; KEY_LENGTH])
    }

    #[cfg(unix)]
    fn chmod(path: &Path, mode: u32) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn test_sidecar_naming() {
        assert_eq!(
            sidecar_path(Path::new("/p/.env")),
            PathBuf::from("/p/.env.svault")
        );
        assert_eq!(
            plaintext_path(Path::new("/p/.env.svault")),
            Some(PathBuf::from("/p/.env"))
        );
        assert_eq!(plaintext_path(Path::new("/p/.env")), None);
        assert!(is_encrypted_path(Path::new("/p/KEY.SVAULT")));
        assert_eq!(
            plaintext_path(Path::new("/p/KEY.SVAULT")),
            Some(PathBuf::from("/p/KEY"))
        );
        assert!(!is_encrypted_path(Path::new("/p/notes.svaultx")));
    }

    #[cfg(unix)]
    #[test]
    fn test_plaintext_path_keeps_non_utf8_components() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let sidecar = Path::new(OsStr::from_bytes(b"/p/caf\xe9/.env.svault"));
        let expected = Path::new(OsStr::from_bytes(b"/p/caf\xe9/.env"));

        assert_eq!(plaintext_path(sidecar).as_deref(), Some(expected));
        assert_eq!(sidecar_path(expected), sidecar);
    }

    #[test]
    fn test_encrypt_then_decrypt_file() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join(".env");
        fs::write(&plain, b"API_KEY=123").unwrap();

        let locked = encrypt_file(&plain, &key()).unwrap().unwrap();
        assert_eq!(locked.path, temp.path().join(".env.svault"));
        assert!(!plain.exists());
        assert!(locked.path.exists());

        let restored = decrypt_file(&locked.path, &key()).unwrap();
        assert_eq!(restored, plain);
        assert_eq!(fs::read(&plain).unwrap(), b"API_KEY=123");
        assert!(!locked.path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_survives_lock_unlock() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("deploy.key");
        fs::write(&plain, b"-----BEGIN").unwrap();
        chmod(&plain, 0o640);

        let locked = encrypt_file(&plain, &key()).unwrap().unwrap();
        assert_eq!(locked.original_mode, 0o640);
        assert_eq!(file_mode(&locked.path).unwrap(), CIPHERTEXT_MODE);

        decrypt_file(&locked.path, &key()).unwrap();
        assert_eq!(file_mode(&plain).unwrap(), 0o640);
    }

    #[test]
    fn test_encrypt_already_encrypted_is_noop() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("x.svault");
        fs::write(&path, b"whatever").unwrap();

        assert_eq!(encrypt_file(&path, &key()).unwrap(), None);
        assert_eq!(fs::read(&path).unwrap(), b"whatever");
    }

    #[test]
    fn test_decrypt_requires_suffix() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plain.txt");
        fs::write(&path, b"x").unwrap();

        assert!(matches!(
            decrypt_file(&path, &key()),
            Err(Error::NotEncrypted(_))
        ));
    }

    #[test]
    fn test_decrypt_wrong_key_keeps_ciphertext() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join(".env");
        fs::write(&plain, b"TOKEN=1").unwrap();
        let locked = encrypt_file(&plain, &key()).unwrap().unwrap();

        let other = VaultKey::from_bytes([1u8; KEY_LENGTH]);
        assert!(decrypt_file(&locked.path, &other).is_err());
        assert!(locked.path.exists());
        assert!(!plain.exists());
    }

    #[test]
    fn test_decrypt_refuses_to_clobber_plaintext() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join(".env");
        fs::write(&plain, b"OLD=1").unwrap();
        let locked = encrypt_file(&plain, &key()).unwrap().unwrap();

        // Both copies present, as after an interrupted run.
        fs::write(&plain, b"NEWER=2").unwrap();

        assert!(matches!(
            decrypt_file(&locked.path, &key()),
            Err(Error::TargetExists(_))
        ));
        assert_eq!(fs::read(&plain).unwrap(), b"NEWER=2");
        assert!(locked.path.exists());
    }

    #[test]
    fn test_relock_with_both_copies_replaces_stale_sidecar() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join(".env");
        fs::write(&plain, b"OLD=1").unwrap();
        encrypt_file(&plain, &key()).unwrap().unwrap();
        fs::write(&plain, b"NEWER=2").unwrap();

        let locked = encrypt_file(&plain, &key()).unwrap().unwrap();
        let restored = decrypt_file(&locked.path, &key()).unwrap();

        assert_eq!(fs::read(restored).unwrap(), b"NEWER=2");
    }

    #[test]
    fn test_restore_overwrite_protection() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join(".env");
        fs::write(&plain, b"SECRET=1").unwrap();
        let locked = encrypt_file(&plain, &key()).unwrap().unwrap();
        fs::write(&plain, b"local edit").unwrap();

        let err = restore_plaintext(&locked.path, &plain, &key(), 0, false).unwrap_err();
        assert!(err.is_target_exists());
        assert_eq!(fs::read(&plain).unwrap(), b"local edit");

        restore_plaintext(&locked.path, &plain, &key(), 0, true).unwrap();
        assert_eq!(fs::read(&plain).unwrap(), b"SECRET=1");
        assert!(locked.path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_mode_fallbacks() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("zero.svault");
        fs::write(&source, envelope::seal(b"x", &key(), 0).unwrap()).unwrap();

        let with_fallback = temp.path().join("a");
        restore_plaintext(&source, &with_fallback, &key(), 0o640, false).unwrap();
        assert_eq!(file_mode(&with_fallback).unwrap(), 0o640);

        let with_default = temp.path().join("b");
        restore_plaintext(&source, &with_default, &key(), 0, false).unwrap();
        assert_eq!(file_mode(&with_default).unwrap(), DEFAULT_MODE);
    }

    #[test]
    fn test_restore_creates_missing_parent() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("s.svault");
        fs::write(&source, envelope::seal(b"x", &key(), 0o600).unwrap()).unwrap();
        let target = temp.path().join("gone").join("dir").join(".env");

        restore_plaintext(&source, &target, &key(), 0, false).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"x");
    }
}
