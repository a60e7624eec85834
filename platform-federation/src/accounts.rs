//! Local account collaborator.
//!
//! The account storage engine lives outside this crate; federation only
//! needs name lookups, name validity and account creation.
//! [`MemoryAccountStore`] is an in-process implementation for tests and
//! single-node deployments.

use crate::error::{FederationError, FederationResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Maximum account name length in bytes.
pub const MAX_ACCOUNT_NAME_BYTES: usize = 255;

const FORBIDDEN_NAME_CHARS: &[char] = &['#', '<', '>', '[', ']', '|', '{', '}', '/', '@', ':'];

/// A user authenticated in the current local session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    /// Local account ID
    pub id: Uuid,
    /// Local account name
    pub name: String,
}

impl LocalUser {
    /// Create a local user.
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Local account storage.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// ID of the account with exactly this name.
    async fn id_for_name(&self, name: &str) -> FederationResult<Option<Uuid>>;

    /// Name of the account with this ID.
    async fn name_for_id(&self, id: Uuid) -> FederationResult<Option<String>>;

    /// Create an account and return its ID.
    async fn create_account(&self, name: &str) -> FederationResult<Uuid>;

    /// Delete an account created by [`AccountStore::create_account`] that was
    /// never linked. Removing an unknown ID is not an error.
    async fn remove_account(&self, id: Uuid) -> FederationResult<()>;

    /// Whether `name` is acceptable as a local account name.
    fn is_valid_name(&self, name: &str) -> bool {
        is_valid_account_name(name)
    }
}

/// Canonical form of an account name: first character upper-cased.
pub fn normalize_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Default account name rules.
pub fn is_valid_account_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_ACCOUNT_NAME_BYTES
        && name.trim() == name
        && !name
            .chars()
            .any(|c| c.is_control() || FORBIDDEN_NAME_CHARS.contains(&c))
}

#[derive(Debug, Default)]
struct Accounts {
    by_name: HashMap<String, Uuid>,
    by_id: HashMap<Uuid, String>,
}

/// In-memory account store.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<Accounts>,
}

impl MemoryAccountStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accounts.
    pub async fn len(&self) -> usize {
        self.accounts.read().await.by_id.len()
    }

    /// Whether the store has no accounts.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn id_for_name(&self, name: &str) -> FederationResult<Option<Uuid>> {
        Ok(self.accounts.read().await.by_name.get(name).copied())
    }

    async fn name_for_id(&self, id: Uuid) -> FederationResult<Option<String>> {
        Ok(self.accounts.read().await.by_id.get(&id).cloned())
    }

    async fn create_account(&self, name: &str) -> FederationResult<Uuid> {
        if !self.is_valid_name(name) {
            return Err(FederationError::StorageError(format!(
                "invalid account name: {}",
                name
            )));
        }

        let mut accounts = self.accounts.write().await;
        if accounts.by_name.contains_key(name) {
            return Err(FederationError::StorageError(format!(
                "account name already taken: {}",
                name
            )));
        }

        let id = Uuid::now_v7();
        accounts.by_name.insert(name.to_string(), id);
        accounts.by_id.insert(id, name.to_string());
        Ok(id)
    }

    async fn remove_account(&self, id: Uuid) -> FederationResult<()> {
        let mut accounts = self.accounts.write().await;
        if let Some(name) = accounts.by_id.remove(&id) {
            accounts.by_name.remove(&name);
        }
        Ok(())
    }
}
