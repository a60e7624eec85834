//! Remote identity provider capability
//!
//! A [`Provider`] adapts one remote identity service to the two-leg login
//! handshake. Concrete providers are selected at startup through an explicit
//! [`ProviderRegistry`] keyed by the configured provider type.

use crate::accounts::LocalUser;
use crate::config::ProviderConfig;
use crate::error::{FederationError, FederationResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Credential bridging the two legs of the handshake.
///
/// Stored in the session by the first leg and consumed exactly once by the
/// second.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken {
    /// Request key (OAuth1 request token, or PKCE verifier for OAuth2)
    pub request_key: Option<String>,

    /// Request secret (OAuth1 token secret, or OAuth2 CSRF state)
    pub request_secret: String,
}

impl std::fmt::Debug for ContinuationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuationToken")
            .field("request_key", &self.request_key.as_ref().map(|_| "[REDACTED]"))
            .field("request_secret", &"[REDACTED]")
            .finish()
    }
}

impl ContinuationToken {
    /// Create a token with only a secret.
    pub fn new(request_secret: impl Into<String>) -> Self {
        Self {
            request_key: None,
            request_secret: request_secret.into(),
        }
    }

    /// Attach a request key.
    pub fn with_key(mut self, request_key: impl Into<String>) -> Self {
        self.request_key = Some(request_key.into());
        self
    }
}

/// Result of [`Provider::login`].
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Token to persist until the browser comes back
    pub token: ContinuationToken,

    /// Where to send the browser; empty means the provider could not
    /// produce a redirect target
    pub authorize_url: String,
}

/// Query parameters the remote provider sent the browser back with.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    params: HashMap<String, String>,
}

impl CallbackParams {
    /// Create empty callback parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Get a non-empty parameter.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CallbackParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            params: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Identity claims returned by a remote provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    /// Remote username; required for a usable identity
    pub username: Option<String>,

    /// Real name
    pub real_name: Option<String>,

    /// Email address
    pub email: Option<String>,

    /// Provider-specific attributes
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl RemoteIdentity {
    /// Create an identity with a username.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Default::default()
        }
    }

    /// Set the real name.
    pub fn with_real_name(mut self, real_name: impl Into<String>) -> Self {
        self.real_name = Some(real_name.into());
        self
    }

    /// Set the email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Outcome of [`Provider::fetch_identity`].
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityFetch {
    /// The provider vouches for this identity
    Identity(RemoteIdentity),

    /// The provider deliberately refused the login
    Rejected {
        /// Human-readable reason, if the provider gave one
        reason: Option<String>,
    },
}

impl IdentityFetch {
    /// Rejection without a reason.
    pub fn rejected() -> Self {
        IdentityFetch::Rejected { reason: None }
    }

    /// Rejection with a reason shown to the user.
    pub fn rejected_with(reason: impl Into<String>) -> Self {
        IdentityFetch::Rejected {
            reason: Some(reason.into()),
        }
    }
}

/// Capability interface of one remote identity service.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider type name, for logging.
    fn kind(&self) -> &str;

    /// Begin the handshake.
    ///
    /// Must not touch local state; the caller persists the returned token.
    async fn login(&self) -> FederationResult<AuthorizationRequest>;

    /// Exchange the continuation token and callback parameters for identity
    /// claims.
    async fn fetch_identity(
        &self,
        token: &ContinuationToken,
        callback: &CallbackParams,
    ) -> FederationResult<IdentityFetch>;

    /// Tell the remote side the user logged out. Best effort.
    async fn logout(&self, _user: &LocalUser) -> FederationResult<()> {
        Ok(())
    }

    /// Hook run once a local account has been linked to the remote identity.
    async fn finalize(&self, _account_id: Uuid) -> FederationResult<()> {
        Ok(())
    }
}

/// Constructor of a concrete provider from its configuration.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> FederationResult<Arc<dyn Provider>> + Send + Sync>;

/// Provider types available to this process.
///
/// Populated once at startup and passed to the orchestrator.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in provider types.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "oauth")]
        registry.register(crate::oauth::OAUTH2_PROVIDER_TYPE, |config| {
            Ok(Arc::new(crate::oauth::OAuth2Provider::new(config)?) as Arc<dyn Provider>)
        });
        registry
    }

    /// Register a provider type, replacing any previous registration.
    pub fn register<F>(&mut self, provider_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ProviderConfig) -> FederationResult<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        self.factories
            .insert(provider_type.into().to_lowercase(), Arc::new(factory));
        self
    }

    /// Check whether a provider type is registered.
    pub fn contains(&self, provider_type: &str) -> bool {
        self.factories.contains_key(&provider_type.to_lowercase())
    }

    /// Registered provider types, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Build the provider selected by `config`.
    ///
    /// Fails with a configuration error for an unknown type or missing client
    /// credentials; no network call is made.
    pub fn build(&self, config: &ProviderConfig) -> FederationResult<Arc<dyn Provider>> {
        let factory = self
            .factories
            .get(&config.provider_type.to_lowercase())
            .ok_or_else(|| FederationError::UnknownProvider(config.provider_type.clone()))?;
        config.validate()?;
        factory(config)
    }
}
