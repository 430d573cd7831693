//! Credential persistence abstraction.

use async_trait::async_trait;

use super::types::{CredentialPair, StorageKey};
use crate::error::StorageError;

/// Durable key-value store for the credential pair.
///
/// Implementations must be idempotent: saving the value already stored under a
/// key is observably a no-op.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save(&self, key: StorageKey, value: &str) -> Result<(), StorageError>;

    async fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError>;

    async fn remove(&self, key: StorageKey) -> Result<(), StorageError>;

    /// Remove every entry.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Persist both halves of a pair.
    async fn save_pair(&self, pair: &CredentialPair) -> Result<(), StorageError> {
        self.save(StorageKey::AccessToken, &pair.access_token).await?;
        self.save(StorageKey::RefreshToken, &pair.refresh_token).await
    }

    /// Load the stored pair, if both halves are present.
    async fn load_pair(&self) -> Result<Option<CredentialPair>, StorageError> {
        let access = self.get(StorageKey::AccessToken).await?;
        let refresh = self.get(StorageKey::RefreshToken).await?;
        Ok(match (access, refresh) {
            (Some(access), Some(refresh)) => Some(CredentialPair::new(access, refresh)),
            _ => None,
        })
    }
}
