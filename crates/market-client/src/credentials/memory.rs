//! In-process credential store.

use async_trait::async_trait;
use dashmap::DashMap;

use super::store::CredentialStore;
use super::types::StorageKey;
use crate::error::StorageError;

/// Credential store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: DashMap<StorageKey, String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn save(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key, value.to_string());
        Ok(())
    }

    async fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(&key).map(|v| v.value().clone()))
    }

    async fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        self.entries.remove(&key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialPair;

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let store = MemoryCredentialStore::new();
        store.save(StorageKey::AccessToken, "a1").await.unwrap();
        store.save(StorageKey::AccessToken, "a1").await.unwrap();
        assert_eq!(
            store.get(StorageKey::AccessToken).await.unwrap().as_deref(),
            Some("a1")
        );
    }

    #[tokio::test]
    async fn test_clear_removes_every_key() {
        let store = MemoryCredentialStore::new();
        store
            .save_pair(&CredentialPair::new("a1", "r1"))
            .await
            .unwrap();
        store.clear().await.unwrap();

        for key in StorageKey::ALL {
            assert_eq!(store.get(key).await.unwrap(), None);
        }
        assert_eq!(store.load_pair().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_pair_requires_both_halves() {
        let store = MemoryCredentialStore::new();
        store.save(StorageKey::RefreshToken, "r1").await.unwrap();
        assert_eq!(store.load_pair().await.unwrap(), None);

        store.save(StorageKey::AccessToken, "a1").await.unwrap();
        assert_eq!(
            store.load_pair().await.unwrap(),
            Some(CredentialPair::new("a1", "r1"))
        );

        store.remove(StorageKey::AccessToken).await.unwrap();
        assert_eq!(store.get(StorageKey::AccessToken).await.unwrap(), None);
    }
}
