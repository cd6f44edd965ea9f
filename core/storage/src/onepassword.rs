//! 1Password document store driven through the `op` command-line tool.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info};

use crate::provider::{DocumentMetadata, DocumentStore};
use secretvault_common::{Error, Result, SensitiveBytes};

/// Keys that may carry a document identifier in `op` JSON output.
const ID_FIELDS: [&str; 3] = ["id", "uuid", "documentId"];

/// Longest tag value kept after sanitising.
const MAX_TAG_LEN: usize = 64;

/// Longest joined tag list `op` accepts comfortably.
const MAX_TAG_LIST_LEN: usize = 1000;

/// Prefix of the custom fields written onto every document.
const FIELD_PREFIX: &str = "secretvault";

/// Shape of the identifier found in `op document create` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentIdResponse {
    /// A JSON object carrying one of the id fields.
    Object(String),
    /// A JSON array whose first object with an id field wins.
    Array(String),
    /// Anything else: the trimmed raw output is taken as the id.
    Raw(String),
}

impl DocumentIdResponse {
    /// Classify `op` output, trying object shape, then array shape, then raw text.
    pub fn parse(output: &[u8]) -> Self {
        let parsed = match serde_json::from_slice::<Value>(output) {
            Ok(Value::Object(map)) => id_from_object(&map).map(Self::Object),
            Ok(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_object)
                .find_map(id_from_object)
                .map(Self::Array),
            _ => None,
        };
        parsed.unwrap_or_else(|| Self::Raw(String::from_utf8_lossy(output).trim().to_string()))
    }

    /// The identifier, if non-empty.
    pub fn into_id(self) -> Option<String> {
        let id = match self {
            Self::Object(id) | Self::Array(id) | Self::Raw(id) => id,
        };
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }
}

fn id_from_object(map: &Map<String, Value>) -> Option<String> {
    ID_FIELDS.iter().find_map(|key| {
        map.get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

fn is_tag_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
}

/// Lowercase, collapse disallowed runs to `-`, trim separators, cap length.
pub fn sanitize_tag(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    let mut replaced = String::with_capacity(lowered.len());
    let mut in_run = false;
    for c in lowered.chars() {
        if is_tag_char(c) {
            replaced.push(c);
            in_run = false;
        } else if !in_run {
            replaced.push('-');
            in_run = true;
        }
    }
    let trimmed = replaced.trim_matches(|c| c == '-' || c == '.' || c == '_');
    trimmed.chars().take(MAX_TAG_LEN).collect()
}

/// Comma-separated tag list for a document.
pub fn tag_list(metadata: &DocumentMetadata) -> String {
    let mut tags = vec![
        "secretvault".to_string(),
        "source:secretvault".to_string(),
        format!("os:{}", sanitize_tag(std::env::consts::OS)),
    ];
    for (key, value) in [
        ("project", &metadata.project_id),
        ("host", &metadata.machine),
        ("user", &metadata.user),
    ] {
        let value = sanitize_tag(value);
        if !value.is_empty() {
            tags.push(format!("{}:{}", key, value));
        }
    }

    let joined = tags.join(",");
    if joined.len() > MAX_TAG_LIST_LEN {
        return tags[..3].join(",");
    }
    joined
}

/// `op item edit` assignments for every non-blank metadata field.
pub fn field_assignments(metadata: &DocumentMetadata) -> Vec<String> {
    metadata
        .fields()
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(key, value)| format!("{}.{}[text]={}", FIELD_PREFIX, key, value.trim()))
        .collect()
}

/// Document store backed by the 1Password CLI.
#[derive(Debug, Clone)]
pub struct OnePasswordCli {
    binary: PathBuf,
}

impl OnePasswordCli {
    /// Use `op` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("op")
    }

    /// Use a specific `op` executable.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[String]) -> Result<Output> {
        debug!(command = %args.first().map(String::as_str).unwrap_or(""), "running op");
        Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| Error::Remote(format!("could not run {}: {}", self.binary.display(), e)))
    }

    fn run_checked(&self, what: &str, args: &[String]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(Error::Remote(format!(
                "{} failed: {} ({})",
                what,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }

    fn with_vault(mut args: Vec<String>, vault: Option<&str>) -> Vec<String> {
        if let Some(vault) = vault.map(str::trim).filter(|v| !v.is_empty()) {
            args.push("--vault".to_string());
            args.push(vault.to_string());
        }
        args
    }
}

impl Default for OnePasswordCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for OnePasswordCli {
    fn name(&self) -> &str {
        "1password"
    }

    fn is_available(&self) -> Result<bool> {
        let args = ["account", "list", "--format", "json"].map(String::from);
        let output = match self.run(&args) {
            Ok(output) if output.status.success() => output,
            _ => return Ok(false),
        };
        let accounts: Vec<Value> = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Remote(format!("unexpected op account list output: {}", e)))?;
        Ok(!accounts.is_empty())
    }

    fn upload(
        &self,
        source: &Path,
        vault: &str,
        title: &str,
        metadata: &DocumentMetadata,
    ) -> Result<String> {
        let mut args = vec![
            "document".to_string(),
            "create".to_string(),
            source.to_string_lossy().into_owned(),
            "--vault".to_string(),
            vault.to_string(),
            "--title".to_string(),
            title.to_string(),
            "--format".to_string(),
            "json".to_string(),
        ];
        let tags = tag_list(metadata);
        if !tags.is_empty() {
            args.push("--tags".to_string());
            args.push(tags);
        }

        let output = self.run_checked("op document create", &args)?;
        let id = DocumentIdResponse::parse(&output.stdout)
            .into_id()
            .ok_or_else(|| Error::Remote("could not parse document id from op output".to_string()))?;

        if !metadata.is_empty() {
            let mut edit = Self::with_vault(
                vec!["item".to_string(), "edit".to_string(), id.clone()],
                Some(vault),
            );
            edit.extend(field_assignments(metadata));
            self.run_checked("op item edit", &edit)?;
        }

        info!(title, "uploaded document");
        Ok(id)
    }

    fn fetch(&self, document_id: &str, vault: Option<&str>) -> Result<SensitiveBytes> {
        let args = Self::with_vault(
            vec![
                "document".to_string(),
                "get".to_string(),
                document_id.to_string(),
            ],
            vault,
        );
        let output = self.run_checked("op document get", &args)?;
        Ok(SensitiveBytes::new(output.stdout))
    }

    fn delete(&self, document_id: &str, vault: Option<&str>) -> Result<()> {
        if document_id.trim().is_empty() {
            return Err(Error::InvalidInput("missing document id".to_string()));
        }
        let args = Self::with_vault(
            vec![
                "item".to_string(),
                "delete".to_string(),
                document_id.to_string(),
            ],
            vault,
        );
        self.run_checked("op item delete", &args)?;
        Ok(())
    }
}
