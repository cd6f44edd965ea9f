//! Remote document store collaborators for SecretVault.
//!
//! A document store keeps an optional second copy of a tracked file outside
//! the machine. The vault engine only consumes the [`DocumentStore`] trait:
//! it records what was uploaded and falls back to fetching it when no local
//! ciphertext survives.
//!
//! # Design Principles
//! - Provider isolation: no store-specific logic in vault or crypto modules
//! - Plain bytes in, plain bytes out: callers own atomic placement and modes

pub mod memory;
pub mod onepassword;
pub mod provider;

pub use memory::MemoryDocumentStore;
pub use onepassword::{DocumentIdResponse, OnePasswordCli};
pub use provider::{DocumentMetadata, DocumentStore};
