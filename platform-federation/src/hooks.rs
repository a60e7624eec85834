//! Extension points around the login flow.

use crate::accounts::LocalUser;
use crate::provider::RemoteIdentity;
use async_trait::async_trait;

/// Verdict of the post-fetch login gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Continue with the (possibly amended) identity
    Allow,

    /// Refuse the login, optionally telling the user why
    Deny(Option<String>),
}

/// Callbacks invoked by the orchestrator.
///
/// Every method has a pass-through default.
#[async_trait]
pub trait LoginHooks: Send + Sync {
    /// Inspect or amend the remote identity before it is resolved.
    async fn after_fetch_identity(
        &self,
        _provider_id: &str,
        _identity: &mut RemoteIdentity,
    ) -> GateDecision {
        GateDecision::Allow
    }

    /// Runs before the provider is told about a logout.
    async fn before_logout(&self, _user: &LocalUser) {}

    /// Return `false` to keep the user out of the auto-populated groups.
    async fn before_auto_populate_groups(&self, _user: &LocalUser) -> bool {
        true
    }
}

/// Hooks that allow everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl LoginHooks for NoHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct DenyBanned;

    #[async_trait]
    impl LoginHooks for DenyBanned {
        async fn after_fetch_identity(
            &self,
            _provider_id: &str,
            identity: &mut RemoteIdentity,
        ) -> GateDecision {
            if identity.username.as_deref() == Some("banned") {
                return GateDecision::Deny(Some("Account suspended".to_string()));
            }
            identity.email = None;
            GateDecision::Allow
        }
    }

    #[tokio::test]
    async fn test_default_hooks_allow() {
        let mut identity = RemoteIdentity::new("alice");
        assert_eq!(
            NoHooks.after_fetch_identity("forum", &mut identity).await,
            GateDecision::Allow
        );
        assert!(
            NoHooks
                .before_auto_populate_groups(&LocalUser::new(Uuid::now_v7(), "Alice"))
                .await
        );
    }

    #[tokio::test]
    async fn test_gate_can_amend_and_deny() {
        let mut identity = RemoteIdentity::new("alice").with_email("a@example.com");
        assert_eq!(
            DenyBanned.after_fetch_identity("forum", &mut identity).await,
            GateDecision::Allow
        );
        assert!(identity.email.is_none());

        let mut banned = RemoteIdentity::new("banned");
        assert_eq!(
            DenyBanned.after_fetch_identity("forum", &mut banned).await,
            GateDecision::Deny(Some("Account suspended".to_string()))
        );
    }
}
