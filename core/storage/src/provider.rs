//! Document store trait definition.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use secretvault_common::{ProjectContext, Result, SensitiveBytes};

/// Descriptive metadata attached to an uploaded document.
///
/// Lets a human find the document again from the store's own UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub project_id: String,
    pub project_path: String,
    pub relative_path: String,
    pub absolute_path: String,
    pub directory: String,
    pub filename: String,
    pub machine: String,
    pub user: String,
    pub absorbed_at: String,
}

impl DocumentMetadata {
    /// Describe `absolute` as a file of the project `ctx`.
    pub fn for_path(ctx: &ProjectContext, absolute: &Path) -> Self {
        let display = |p: &Path| p.to_string_lossy().into_owned();
        Self {
            project_id: ctx.project_id().to_string(),
            project_path: display(ctx.project_path()),
            relative_path: ctx
                .relative_path(absolute)
                .map(|rel| display(&rel))
                .unwrap_or_default(),
            absolute_path: display(absolute),
            directory: absolute.parent().map(display).unwrap_or_default(),
            filename: absolute
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            machine: machine_name(),
            user: user_name(),
            absorbed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// True if every field is blank.
    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, v)| v.trim().is_empty())
    }

    /// Field name / value pairs in a fixed order.
    pub fn fields(&self) -> [(&'static str, &str); 9] {
        [
            ("project_id", self.project_id.as_str()),
            ("project_path", self.project_path.as_str()),
            ("relative_path", self.relative_path.as_str()),
            ("absolute_path", self.absolute_path.as_str()),
            ("directory", self.directory.as_str()),
            ("filename", self.filename.as_str()),
            ("machine", self.machine.as_str()),
            ("user", self.user.as_str()),
            ("absorbed_at", self.absorbed_at.as_str()),
        ]
    }
}

fn machine_name() -> String {
    for var in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(value) = std::env::var(var) {
            if !value.trim().is_empty() {
                return value.trim().to_string();
            }
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn user_name() -> String {
    ["USER", "USERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

/// Remote document store used as a secondary restore source.
///
/// Implementations must handle their own authentication. Every call is
/// synchronous and runs to completion.
pub trait DocumentStore: Send + Sync {
    /// Get the store name (e.g., "1password", "memory").
    fn name(&self) -> &str;

    /// Check whether the store is installed and authenticated.
    fn is_available(&self) -> Result<bool>;

    /// Upload a file as a new document.
    ///
    /// # Postconditions
    /// - Returns the store's identifier for the new document
    ///
    /// # Errors
    /// - `Remote` if the store rejects the upload or returns no id
    fn upload(
        &self,
        source: &Path,
        vault: &str,
        title: &str,
        metadata: &DocumentMetadata,
    ) -> Result<String>;

    /// Download a document's content.
    ///
    /// # Errors
    /// - `Remote` if the document cannot be fetched
    fn fetch(&self, document_id: &str, vault: Option<&str>) -> Result<SensitiveBytes>;

    /// Delete a document.
    ///
    /// # Errors
    /// - `InvalidInput` if `document_id` is blank
    /// - `Remote` if the store refuses
    fn delete(&self, document_id: &str, vault: Option<&str>) -> Result<()>;
}
