//! File-backed credential store.
//!
//! Entries live in a single JSON object keyed by [`StorageKey::as_str`].
//! Writes go to a sibling temp file that is renamed over the target, so a
//! crash mid-write leaves either the old or the new document.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::store::CredentialStore;
use super::types::StorageKey;
use crate::error::StorageError;

type Document = BTreeMap<String, String>;

/// Credential store persisted to a JSON file.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Document, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Document::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Document::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_document(&self, document: &Document) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        trace!(path = %self.path.display(), entries = document.len(), "Credential file written");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn save(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        if document.get(key.as_str()).map(String::as_str) == Some(value) {
            return Ok(());
        }
        document.insert(key.as_str().to_string(), value.to_string());
        self.write_document(&document).await
    }

    async fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        Ok(document.remove(key.as_str()))
    }

    async fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        if document.remove(key.as_str()).is_none() {
            return Ok(());
        }
        self.write_document(&document).await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Credential file removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
