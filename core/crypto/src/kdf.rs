//! Key derivation using Argon2id.
//!
//! Passphrase-derived keys use a fixed application salt: the same passphrase
//! must reproduce the same vault key on any machine and in any checkout, so
//! the salt cannot be random or bound to the project path.

use argon2::{Algorithm, Argon2, Params, Version};

use crate::keys::{VaultKey, KEY_LENGTH};
use secretvault_common::{Error, Result};

/// Application-wide salt for passphrase derivation.
const PASSPHRASE_SALT: &[u8] = b"secretvault/passphrase-key/v1";

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Cheap parameters for tests only.
    pub fn insecure_fast() -> Self {
        Self {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a vault key from a passphrase using Argon2id.
///
/// # Preconditions
/// - `passphrase` must not be empty or whitespace only
///
/// # Postconditions
/// - The derived key is deterministic given the same passphrase and params
///
/// # Errors
/// - Returns error if passphrase is empty
/// - Returns error if Argon2id parameters are invalid
pub fn derive_key_from_passphrase(passphrase: &[u8], params: &KdfParams) -> Result<VaultKey> {
    if passphrase.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::InvalidInput(
            "Key value cannot be empty".to_string(),
        ));
    }

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(passphrase, PASSPHRASE_SALT, &mut key_bytes)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    let key = VaultKey::from_bytes(key_bytes);
    zeroize::Zeroize::zeroize(&mut key_bytes);
    Ok(key)
}
