//! Common utilities and types shared across SecretVault modules.
//!
//! This module provides the error taxonomy, the project identity type, lexical
//! path helpers and the atomic write primitive that every other crate builds on.

pub mod atomic;
pub mod error;
pub mod paths;
pub mod types;

pub use atomic::{write_atomic, StagedWrite};
pub use error::{Error, Result};
pub use types::{ProjectContext, SensitiveBytes};
