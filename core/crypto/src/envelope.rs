//! The `.svault` envelope format.
//!
//! ```text
//! MAGIC (8 bytes ASCII) || NONCE (12 bytes) || MODE (u32, big-endian) || CIPHERTEXT || TAG (16 bytes)
//! ```
//!
//! The envelope is self-describing: it carries the original permission bits so
//! restoring a file never depends on manifest bookkeeping. MAGIC and MODE are
//! authenticated as associated data, so a flipped byte anywhere in the
//! envelope fails decryption instead of yielding a plaintext with a forged
//! mode. Any layout change must bump the version digits of MAGIC first so
//! older envelopes stay decryptable.
//!
//! Version 1 envelopes (`SVAULT01`) share the layout but are AES-256-GCM
//! with no associated data. They are opened, never written.

use tracing::trace;

use crate::aead::{self, NONCE_SIZE};
use crate::keys::VaultKey;
use secretvault_common::{Error, Result, SensitiveBytes};

/// Format and version tag at the start of every envelope.
pub const MAGIC_HEADER: &[u8; 8] = b"SVAULT02";

/// Tag of version 1 envelopes, accepted by [`open`] only.
pub const LEGACY_MAGIC_HEADER: &[u8; 8] = b"SVAULT01";

/// Suffix appended to a file name to form its ciphertext sidecar.
pub const ENCRYPTED_EXT: &str = ".svault";

/// Width of the permission-bits field.
pub const MODE_SIZE: usize = 4;

/// Offset of the nonce.
const NONCE_START: usize = MAGIC_HEADER.len();

/// Offset of the mode field.
const MODE_START: usize = NONCE_START + NONCE_SIZE;

/// Offset of the AEAD ciphertext.
const BODY_START: usize = MODE_START + MODE_SIZE;

/// Smallest byte count that can be framed as an envelope.
pub const MIN_ENVELOPE_LEN: usize = BODY_START;

/// Associated data: the magic header followed by the mode field.
fn associated_data(mode_bytes: &[u8; MODE_SIZE]) -> [u8; 12] {
    let mut aad = [0u8; 12];
    aad[..MAGIC_HEADER.len()].copy_from_slice(MAGIC_HEADER);
    aad[MAGIC_HEADER.len()..].copy_from_slice(mode_bytes);
    aad
}

/// Encrypt `plaintext` into a self-describing envelope.
///
/// # Postconditions
/// - Output starts with MAGIC_HEADER
/// - A fresh random nonce is used on every call
/// - `mode` is stored verbatim and returned by [`open`]
pub fn seal(plaintext: &[u8], key: &VaultKey, mode: u32) -> Result<Vec<u8>> {
    let nonce = aead::generate_nonce();
    let mode_bytes = mode.to_be_bytes();
    let ciphertext =
        aead::encrypt_with_nonce(key, &nonce, plaintext, &associated_data(&mode_bytes))?;

    let mut envelope = Vec::with_capacity(BODY_START + ciphertext.len());
    envelope.extend_from_slice(MAGIC_HEADER);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&mode_bytes);
    envelope.extend_from_slice(&ciphertext);

    trace!(len = envelope.len(), "sealed envelope");
    Ok(envelope)
}

/// Decrypt an envelope, returning the plaintext and stored permission bits.
///
/// # Errors
/// - `InvalidPayload` if the envelope is truncated
/// - `InvalidPayload` if the magic header is neither version
/// - `InvalidPayload` if authentication fails (tampering or wrong key)
///
/// # Security
/// - No partial plaintext is ever returned on failure
pub fn open(envelope: &[u8], key: &VaultKey) -> Result<(SensitiveBytes, u32)> {
    if envelope.len() < MIN_ENVELOPE_LEN {
        return Err(Error::InvalidPayload("envelope too short".to_string()));
    }
    let legacy = envelope.starts_with(LEGACY_MAGIC_HEADER);
    if !legacy && !has_magic(envelope) {
        return Err(Error::InvalidPayload("invalid magic header".to_string()));
    }

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&envelope[NONCE_START..MODE_START]);
    let mut mode_bytes = [0u8; MODE_SIZE];
    mode_bytes.copy_from_slice(&envelope[MODE_START..BODY_START]);

    let body = &envelope[BODY_START..];
    let plaintext = if legacy {
        trace!("opening version 1 envelope");
        aead::decrypt_legacy(key, &nonce, body)?
    } else {
        aead::decrypt_with_nonce(key, &nonce, body, &associated_data(&mode_bytes))?
    };

    Ok((SensitiveBytes::new(plaintext), u32::from_be_bytes(mode_bytes)))
}

/// True if `bytes` begins with the envelope magic header.
pub fn has_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC_HEADER)
}
