//! Lexical path helpers.
//!
//! Paths are made absolute against the current directory and cleaned without
//! touching the filesystem, so symlinks are never resolved. Identity hashes
//! are computed from the result and must not change when a link target does.

use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// Make `path` absolute and lexically clean it (drop `.`, fold `..`).
pub fn absolutize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::io("resolve current directory for", path, e))?;
        cwd.join(path)
    };
    Ok(clean(&joined))
}

/// Lexically normalise a path.
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root.
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Path of `path` relative to `root`, if `path` lies strictly inside `root`.
pub fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    let rel = clean(path).strip_prefix(clean(root)).ok()?.to_path_buf();
    if rel.as_os_str().is_empty() {
        None
    } else {
        Some(rel)
    }
}

/// True when `path` names something that currently exists.
///
/// Empty paths never exist.
pub fn exists(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.symlink_metadata().is_ok()
}
