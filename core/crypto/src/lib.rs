//! Cryptographic primitives for SecretVault.
//!
//! This module provides:
//! - The vault key type with automatic zeroization
//! - Passphrase key derivation using Argon2id
//! - Authenticated encryption using ChaCha20-Poly1305 (AES-256-GCM read-only)
//! - The self-describing `.svault` envelope format
//! - File-level lock/unlock/restore built on the atomic writer
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Decryption fails closed: no partial plaintext on any failure

pub mod aead;
pub mod envelope;
pub mod file;
pub mod kdf;
pub mod keys;

pub use envelope::{open, seal, ENCRYPTED_EXT, LEGACY_MAGIC_HEADER, MAGIC_HEADER};
pub use file::{decrypt_file, encrypt_file, restore_plaintext, EncryptedFile, DEFAULT_MODE};
pub use kdf::{derive_key_from_passphrase, KdfParams};
pub use keys::{VaultKey, KEY_LENGTH};
