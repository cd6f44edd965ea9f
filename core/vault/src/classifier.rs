//! Sensitive-file discovery.
//!
//! Discovery is fail-closed: any filesystem error aborts the whole call,
//! since silently skipping a directory could leave secrets undetected.

use regex::bytes::Regex;
use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::ClassifierRules;
use secretvault_common::{paths, Error, Result};
use secretvault_crypto::file::is_encrypted_path;

/// Which files a walk collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Sensitive,
    Encrypted,
}

/// Classifies paths against an injected [`ClassifierRules`] value.
#[derive(Debug, Clone)]
pub struct Classifier {
    names: HashSet<String>,
    env_prefix: String,
    suffixes: Vec<String>,
    sensitive_dirs: HashSet<String>,
    ignored_dirs: HashSet<String>,
    content: Regex,
    max_content_size: u64,
    sniff_len: usize,
}

fn lowered(items: &[String]) -> HashSet<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}

impl Classifier {
    /// Build a classifier from a rule set.
    ///
    /// # Errors
    /// - `InvalidInput` if the content pattern does not compile
    pub fn new(rules: &ClassifierRules) -> Result<Self> {
        let content = Regex::new(&rules.content_pattern)
            .map_err(|e| Error::InvalidInput(format!("content pattern: {}", e)))?;
        Ok(Self {
            names: lowered(&rules.sensitive_names),
            env_prefix: rules.env_prefix.to_lowercase(),
            suffixes: rules.sensitive_suffixes.iter().map(|s| s.to_lowercase()).collect(),
            sensitive_dirs: lowered(&rules.sensitive_dirs),
            ignored_dirs: lowered(&rules.ignored_dirs),
            content,
            max_content_size: rules.max_content_size,
            sniff_len: rules.sniff_len,
        })
    }

    /// Sorted, deduplicated absolute paths of sensitive plaintext files under `roots`.
    ///
    /// Ciphertext files are skipped. A root naming a file is classified directly.
    ///
    /// # Errors
    /// - `Discovery` on the first filesystem failure; no partial result
    pub fn find_sensitive(&self, roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
        self.discover(roots, Mode::Sensitive)
    }

    /// Sorted, deduplicated absolute paths of ciphertext files under `roots`.
    ///
    /// # Errors
    /// - `Discovery` on the first filesystem failure; no partial result
    pub fn find_encrypted(&self, roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
        self.discover(roots, Mode::Encrypted)
    }

    /// Decide whether a single file is sensitive.
    ///
    /// Rules are checked in order and the first match wins: exact name,
    /// dotenv prefix, suffix, sensitive directory component, then content.
    pub fn is_sensitive(&self, path: &Path) -> Result<bool> {
        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if self.names.contains(&base) {
            return Ok(true);
        }
        if !self.env_prefix.is_empty() && base.starts_with(&self.env_prefix) {
            return Ok(true);
        }
        if self.suffixes.iter().any(|s| base.ends_with(s.as_str())) {
            return Ok(true);
        }
        if self.has_sensitive_dir(path) {
            return Ok(true);
        }
        self.looks_sensitive_by_content(path)
    }

    /// True if the directory is pruned from traversal.
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        self.ignored_dirs.contains(&name.to_lowercase())
    }

    fn has_sensitive_dir(&self, path: &Path) -> bool {
        paths::clean(path).components().any(|c| match c {
            Component::Normal(part) => self
                .sensitive_dirs
                .contains(&part.to_string_lossy().to_lowercase()),
            _ => false,
        })
    }

    fn looks_sensitive_by_content(&self, path: &Path) -> Result<bool> {
        let meta = std::fs::metadata(path).map_err(|e| discovery(path, e))?;
        if meta.len() == 0 || meta.len() > self.max_content_size {
            return Ok(false);
        }

        let file = File::open(path).map_err(|e| discovery(path, e))?;
        let mut buf = Vec::with_capacity(self.sniff_len);
        file.take(self.sniff_len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| discovery(path, e))?;

        Ok(!buf.is_empty() && self.content.is_match(&buf))
    }

    fn accepts(&self, path: &Path, mode: Mode) -> Result<bool> {
        match mode {
            Mode::Sensitive => Ok(!is_encrypted_path(path) && self.is_sensitive(path)?),
            Mode::Encrypted => Ok(is_encrypted_path(path)),
        }
    }

    fn discover(&self, roots: &[PathBuf], mode: Mode) -> Result<Vec<PathBuf>> {
        let mut found = BTreeSet::new();

        for root in normalize_roots(roots) {
            let root = paths::absolutize(&root)?;
            let meta = std::fs::metadata(&root).map_err(|e| discovery(&root, e))?;

            if !meta.is_dir() {
                if self.accepts(&root, mode)? {
                    found.insert(root);
                }
                continue;
            }

            // Roots are always walked, even when their own name is ignored.
            let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !self.is_ignored_dir(&e.file_name().to_string_lossy())
            });

            for entry in walker {
                let entry = entry.map_err(|e| {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                    discovery(&path, source)
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = paths::clean(entry.path());
                if self.accepts(&path, mode)? {
                    debug!(path = %path.display(), "matched");
                    found.insert(path);
                }
            }
        }

        Ok(found.into_iter().collect())
    }
}

/// Discovery roots, defaulting to the current directory when none are given.
pub fn normalize_roots(roots: &[PathBuf]) -> Vec<PathBuf> {
    let roots: Vec<PathBuf> = roots
        .iter()
        .filter(|r| !r.as_os_str().is_empty())
        .cloned()
        .collect();
    if roots.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        roots
    }
}

fn discovery(path: &Path, source: std::io::Error) -> Error {
    Error::Discovery {
        path: path.to_path_buf(),
        source,
    }
}
