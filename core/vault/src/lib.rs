//! Vault engine for SecretVault.
//!
//! This module provides:
//! - Sensitive-file discovery driven by an injected rule set
//! - The per-project manifest and its content-addressed backups
//! - Lock, unlock, absorb and cleanup flows
//! - The restore resolver with local and remote fallbacks
//!
//! # Architecture
//! The engine sits between the command layer and the crypto and storage
//! crates. It runs synchronously, one file at a time; the manifest is the
//! only shared state and every mutation of it holds an advisory lock.

pub mod classifier;
pub mod config;
pub mod lock;
pub mod manifest;
pub mod operations;
pub mod restore;
pub mod store;

pub use classifier::{normalize_roots, Classifier};
pub use config::{ClassifierRules, VaultHome};
pub use lock::ManifestLock;
pub use manifest::{FileId, RemoteDocument, VaultEntry, VaultManifest};
pub use operations::{
    absorb_file, cleanup_remote, cleanup_targets, lock_file, lock_targets, unlock_files,
    CleanupOutcome, UnlockOutcome,
};
pub use restore::{
    resolve_local_source, resolve_target_path, select_entries, status, EntryStatus,
    RestoreOutcome, RestoreSource, Restorer,
};
pub use store::ManifestStore;
