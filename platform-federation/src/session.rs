//! Session storage collaborator.
//!
//! The login handshake spans two requests, so everything the second leg
//! needs is written to the user's session by the first. Values are JSON
//! documents; writes are durable once [`SessionStore::save`] returns.

use crate::error::{FederationError, FederationResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Session key holding the serialized continuation token.
pub const CONTINUATION_KEY: &str = "federation.continuation";

/// Session key holding the normalized remote username between resolution
/// and account finalization.
pub const REMOTE_USERNAME_KEY: &str = "federation.remote_username";

/// Per-user session storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> FederationResult<Option<Value>>;

    /// Write a value.
    async fn set(&self, key: &str, value: Value) -> FederationResult<()>;

    /// Delete a value.
    async fn remove(&self, key: &str) -> FederationResult<()>;

    /// Read and delete a value in one atomic step.
    ///
    /// Of two concurrent callers at most one observes the value.
    async fn take(&self, key: &str) -> FederationResult<Option<Value>>;

    /// Commit pending writes.
    async fn save(&self) -> FederationResult<()>;
}

/// Write a serializable value under `key`.
pub async fn set_json<T: Serialize + Sync>(
    session: &dyn SessionStore,
    key: &str,
    value: &T,
) -> FederationResult<()> {
    let value = serde_json::to_value(value)
        .map_err(|e| FederationError::SessionError(format!("failed to encode {}: {}", key, e)))?;
    session.set(key, value).await
}

/// Atomically take and decode the value under `key`.
pub async fn take_json<T: DeserializeOwned>(
    session: &dyn SessionStore,
    key: &str,
) -> FederationResult<Option<T>> {
    match session.take(key).await? {
        Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
            FederationError::SessionError(format!("failed to decode {}: {}", key, e))
        }),
        None => Ok(None),
    }
}

/// Read and decode the value under `key`.
pub async fn get_json<T: DeserializeOwned>(
    session: &dyn SessionStore,
    key: &str,
) -> FederationResult<Option<T>> {
    match session.get(key).await? {
        Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
            FederationError::SessionError(format!("failed to decode {}: {}", key, e))
        }),
        None => Ok(None),
    }
}

#[derive(Debug, Default)]
struct SessionState {
    data: HashMap<String, Value>,
    committed: HashMap<String, Value>,
    saves: u64,
}

/// In-memory session.
///
/// Keeps the working data apart from the last committed snapshot so callers
/// can check what a `save` made durable.
#[derive(Debug, Default)]
pub struct MemorySession {
    state: Mutex<SessionState>,
}

impl MemorySession {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value under `key` as of the last `save`.
    pub async fn committed(&self, key: &str) -> Option<Value> {
        self.state.lock().await.committed.get(key).cloned()
    }

    /// Whether `key` is present in the working data.
    pub async fn contains(&self, key: &str) -> bool {
        self.state.lock().await.data.contains_key(key)
    }

    /// Number of completed saves.
    pub async fn save_count(&self) -> u64 {
        self.state.lock().await.saves
    }
}

#[async_trait]
impl SessionStore for MemorySession {
    async fn get(&self, key: &str) -> FederationResult<Option<Value>> {
        Ok(self.state.lock().await.data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> FederationResult<()> {
        self.state.lock().await.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> FederationResult<()> {
        self.state.lock().await.data.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> FederationResult<Option<Value>> {
        Ok(self.state.lock().await.data.remove(key))
    }

    async fn save(&self) -> FederationResult<()> {
        let mut state = self.state.lock().await;
        state.committed = state.data.clone();
        state.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ContinuationToken;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_writes_are_durable_after_save() {
        let session = MemorySession::new();
        session.set("k", Value::from("v")).await.unwrap();
        assert_eq!(session.committed("k").await, None);

        session.save().await.unwrap();
        assert_eq!(session.committed("k").await, Some(Value::from("v")));
        assert_eq!(session.save_count().await, 1);

        session.remove("k").await.unwrap();
        assert_eq!(session.get("k").await.unwrap(), None);
        assert!(session.committed("k").await.is_some());
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let session = MemorySession::new();
        let token = ContinuationToken::new("secret").with_key("key");
        set_json(&session, CONTINUATION_KEY, &token).await.unwrap();

        let taken: Option<ContinuationToken> =
            take_json(&session, CONTINUATION_KEY).await.unwrap();
        assert_eq!(taken, Some(token));

        let again: Option<ContinuationToken> =
            take_json(&session, CONTINUATION_KEY).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_take_has_one_winner() {
        let session = Arc::new(MemorySession::new());
        session.set(CONTINUATION_KEY, Value::from("t")).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.take(CONTINUATION_KEY).await })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_decode_failure_is_session_error() {
        let session = MemorySession::new();
        session
            .set(CONTINUATION_KEY, Value::from(42))
            .await
            .unwrap();

        let result: FederationResult<Option<ContinuationToken>> =
            take_json(&session, CONTINUATION_KEY).await;
        assert!(matches!(result, Err(FederationError::SessionError(_))));
        assert!(!session.contains(CONTINUATION_KEY).await);
    }
}
