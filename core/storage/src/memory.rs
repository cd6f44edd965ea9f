//! In-memory document store for testing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::provider::{DocumentMetadata, DocumentStore};
use secretvault_common::{Error, Result, SensitiveBytes};

/// A stored document.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub vault: String,
    pub title: String,
    pub data: Vec<u8>,
    pub metadata: DocumentMetadata,
}

/// In-memory document store.
///
/// Useful for testing and development. All documents are kept in memory
/// and lost on drop. Clones share the same storage.
#[derive(Debug, Clone)]
pub struct MemoryDocumentStore {
    documents: Arc<RwLock<HashMap<String, StoredDocument>>>,
    available: Arc<AtomicBool>,
}

impl MemoryDocumentStore {
    /// Create a new empty, available store.
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Toggle what `is_available` reports.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Store a document directly, returning its id.
    pub fn insert(&self, vault: &str, title: &str, data: &[u8]) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let document = StoredDocument {
            vault: vault.to_string(),
            title: title.to_string(),
            data: data.to_vec(),
            metadata: DocumentMetadata::default(),
        };
        self.write()?.insert(id.clone(), document);
        Ok(id)
    }

    /// Look up a document by id.
    pub fn get(&self, document_id: &str) -> Result<Option<StoredDocument>> {
        Ok(self.read()?.get(document_id).cloned())
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.read().map(|docs| docs.len()).unwrap_or(0)
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, StoredDocument>>> {
        self.documents
            .read()
            .map_err(|_| Error::Remote("memory store lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, StoredDocument>>> {
        self.documents
            .write()
            .map_err(|_| Error::Remote("memory store lock poisoned".to_string()))
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Remote("memory store is offline".to_string()))
        }
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_available(&self) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }

    fn upload(
        &self,
        source: &Path,
        vault: &str,
        title: &str,
        metadata: &DocumentMetadata,
    ) -> Result<String> {
        self.ensure_available()?;
        let data = std::fs::read(source).map_err(|e| Error::io("read", source, e))?;
        let id = Uuid::new_v4().to_string();
        let document = StoredDocument {
            vault: vault.to_string(),
            title: title.to_string(),
            data,
            metadata: metadata.clone(),
        };
        self.write()?.insert(id.clone(), document);
        Ok(id)
    }

    fn fetch(&self, document_id: &str, vault: Option<&str>) -> Result<SensitiveBytes> {
        self.ensure_available()?;
        let docs = self.read()?;
        match docs.get(document_id) {
            Some(doc) if vault.is_none_or(|v| v.is_empty() || v == doc.vault) => {
                Ok(SensitiveBytes::new(doc.data.clone()))
            }
            _ => Err(Error::NotFound(format!("document {}", document_id))),
        }
    }

    fn delete(&self, document_id: &str, _vault: Option<&str>) -> Result<()> {
        self.ensure_available()?;
        self.write()?
            .remove(document_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("document {}", document_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_upload_fetch_delete() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join(".env");
        std::fs::write(&source, b"TOKEN=abc\n").unwrap();

        let store = MemoryDocumentStore::new();
        let id = store
            .upload(&source, "Private", "title", &DocumentMetadata::default())
            .unwrap();

        let fetched = store.fetch(&id, Some("Private")).unwrap();
        assert_eq!(fetched.as_bytes(), b"TOKEN=abc\n");
        assert_eq!(store.get(&id).unwrap().unwrap().title, "title");

        store.delete(&id, None).unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.delete(&id, None), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_fetch_wrong_vault() {
        let store = MemoryDocumentStore::new();
        let id = store.insert("Work", "t", b"x").unwrap();

        assert!(store.fetch(&id, Some("Home")).is_err());
        assert!(store.fetch(&id, None).is_ok());
    }

    #[test]
    fn test_offline_store() {
        let store = MemoryDocumentStore::new();
        let id = store.insert("Work", "t", b"x").unwrap();
        store.set_available(false);

        assert!(!store.is_available().unwrap());
        assert!(matches!(store.fetch(&id, None), Err(Error::Remote(_))));
    }

    #[test]
    fn test_clones_share_storage() {
        let store = MemoryDocumentStore::new();
        let other = store.clone();
        store.insert("v", "t", b"x").unwrap();
        assert_eq!(other.len(), 1);
    }
}
