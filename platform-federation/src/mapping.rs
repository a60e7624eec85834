//! Remote identity to local account mappings.
//!
//! Mappings are append-only and unique on (provider ID, remote username).
//! Uniqueness is enforced by the store's insert itself, never by a lookup
//! followed by an insert, so two racing logins cannot both create one.

use crate::error::{FederationError, FederationResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable link between a remote identity and a local account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMapping {
    /// Local account ID
    pub account_id: Uuid,

    /// Normalized remote username
    pub remote_username: String,

    /// Provider configuration ID
    pub provider_id: String,

    /// When the mapping was created
    pub created_at: DateTime<Utc>,
}

impl IdentityMapping {
    /// Create a mapping stamped with the current time.
    pub fn new(
        account_id: Uuid,
        remote_username: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            remote_username: remote_username.into(),
            provider_id: provider_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Persistent mapping table.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Local account mapped to (provider, remote username).
    async fn lookup(
        &self,
        provider_id: &str,
        remote_username: &str,
    ) -> FederationResult<Option<Uuid>>;

    /// Insert a mapping atomically.
    ///
    /// Must fail with [`FederationError::ResolutionConflict`] when the
    /// (provider, remote username) pair already exists, leaving the existing
    /// mapping untouched.
    async fn insert(&self, mapping: IdentityMapping) -> FederationResult<()>;

    /// Number of mappings pointing at a local account.
    async fn count_for_account(&self, account_id: Uuid) -> FederationResult<u64>;
}

type MappingKey = (String, String);

/// In-memory mapping store.
///
/// Counts lookups and inserts so callers can assert which storage
/// operations a login performed.
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    mappings: RwLock<HashMap<MappingKey, IdentityMapping>>,
    lookups: AtomicU64,
    inserts: AtomicU64,
}

impl MemoryMappingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All mappings, in no particular order.
    pub async fn all(&self) -> Vec<IdentityMapping> {
        self.mappings.read().await.values().cloned().collect()
    }

    /// Number of lookups served.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Number of successful inserts.
    pub fn insert_count(&self) -> u64 {
        self.inserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn lookup(
        &self,
        provider_id: &str,
        remote_username: &str,
    ) -> FederationResult<Option<Uuid>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let key = (provider_id.to_string(), remote_username.to_string());
        Ok(self.mappings.read().await.get(&key).map(|m| m.account_id))
    }

    async fn insert(&self, mapping: IdentityMapping) -> FederationResult<()> {
        let key = (mapping.provider_id.clone(), mapping.remote_username.clone());
        let mut mappings = self.mappings.write().await;
        if mappings.contains_key(&key) {
            return Err(FederationError::ResolutionConflict {
                provider_id: mapping.provider_id,
                remote_username: mapping.remote_username,
            });
        }
        mappings.insert(key, mapping);
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn count_for_account(&self, account_id: Uuid) -> FederationResult<u64> {
        Ok(self
            .mappings
            .read()
            .await
            .values()
            .filter(|m| m.account_id == account_id)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_lookup_and_insert() {
        let store = MemoryMappingStore::new();
        let account = Uuid::now_v7();

        assert_eq!(store.lookup("forum", "Alice").await.unwrap(), None);
        store
            .insert(IdentityMapping::new(account, "Alice", "forum"))
            .await
            .unwrap();

        assert_eq!(store.lookup("forum", "Alice").await.unwrap(), Some(account));
        assert_eq!(store.lookup("wiki", "Alice").await.unwrap(), None);
        assert_eq!(store.lookup_count(), 3);
        assert_eq!(store.insert_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected_not_overwritten() {
        let store = MemoryMappingStore::new();
        let first = Uuid::now_v7();
        store
            .insert(IdentityMapping::new(first, "Alice", "forum"))
            .await
            .unwrap();

        let result = store
            .insert(IdentityMapping::new(Uuid::now_v7(), "Alice", "forum"))
            .await;
        assert!(matches!(result, Err(FederationError::ResolutionConflict { .. })));
        assert_eq!(store.lookup("forum", "Alice").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_concurrent_inserts_only_one_wins() {
        let store = Arc::new(MemoryMappingStore::new());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .insert(IdentityMapping::new(Uuid::now_v7(), "Alice", "forum"))
                        .await
                })
            })
            .collect();

        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_count_for_account() {
        let store = MemoryMappingStore::new();
        let account = Uuid::now_v7();
        store
            .insert(IdentityMapping::new(account, "Alice", "forum"))
            .await
            .unwrap();
        store
            .insert(IdentityMapping::new(account, "alice_gh", "github"))
            .await
            .unwrap();

        assert_eq!(store.count_for_account(account).await.unwrap(), 2);
        assert_eq!(store.count_for_account(Uuid::now_v7()).await.unwrap(), 0);
    }
}
