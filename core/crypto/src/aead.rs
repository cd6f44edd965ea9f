//! Authenticated encryption using ChaCha20-Poly1305.
//!
//! 256-bit key, 96-bit random nonce per message, 128-bit Poly1305 tag. The
//! envelope module frames the output and decides what is authenticated as
//! associated data; this module only deals with raw nonce/ciphertext pairs.
//!
//! AES-256-GCM is kept for reading version 1 envelopes only.

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    ChaCha20Poly1305,
};

use crate::keys::VaultKey;
use secretvault_common::{Error, Result};

/// Nonce size for ChaCha20-Poly1305 (12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Generate a fresh random nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let mut out = [0u8; NONCE_SIZE];
    out.copy_from_slice(&nonce);
    out
}

/// Encrypt plaintext with the given nonce, authenticating `aad` alongside it.
///
/// # Preconditions
/// - `nonce` must never be reused with the same key
///
/// # Postconditions
/// - Returns ciphertext || tag, `plaintext.len() + TAG_SIZE` bytes long
pub fn encrypt_with_nonce(
    key: &VaultKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let payload = Payload {
        msg: plaintext,
        aad,
    };

    cipher
        .encrypt(GenericArray::from_slice(nonce), payload)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
}

/// Decrypt ciphertext || tag with the given nonce.
///
/// # Errors
/// - Returns `InvalidPayload` if the input is shorter than a tag
/// - Returns `InvalidPayload` if authentication fails (tampered data or wrong key)
///
/// # Security
/// - Authenticates before returning any plaintext
pub fn decrypt_with_nonce(
    key: &VaultKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::InvalidPayload("ciphertext too short".to_string()));
    }

    let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(GenericArray::from_slice(nonce), payload)
        .map_err(|_| Error::InvalidPayload("authentication failed".to_string()))
}

/// Decrypt a version 1 payload: AES-256-GCM, same nonce and tag sizes,
/// no associated data.
///
/// # Errors
/// - Returns `InvalidPayload` if the input is shorter than a tag
/// - Returns `InvalidPayload` if authentication fails
pub fn decrypt_legacy(
    key: &VaultKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::InvalidPayload("ciphertext too short".to_string()));
    }

    let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
    cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| Error::InvalidPayload("authentication failed".to_string()))
}
