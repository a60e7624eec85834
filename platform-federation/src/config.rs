//! Provider and login policy configuration.
//!
//! Configuration can be deserialized from any serde format or loaded from
//! `FEDERATION_*` environment variables. A provider entry may override each
//! of the global policy toggles individually.

use crate::error::{FederationError, FederationResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration of one remote identity provider.
///
/// Immutable once an orchestrator has been built from it.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registered provider type (e.g. "oauth2")
    #[serde(rename = "type")]
    pub provider_type: String,

    /// OAuth client ID
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret
    #[serde(default)]
    pub client_secret: String,

    /// Authorization endpoint, when the provider type has no fixed one
    #[serde(default)]
    pub authorize_uri: Option<String>,

    /// Where the remote provider sends the browser back to
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// Provider-specific settings
    #[serde(default)]
    pub extension_data: HashMap<String, serde_json::Value>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider_type", &self.provider_type)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("authorize_uri", &self.authorize_uri)
            .field("redirect_uri", &self.redirect_uri)
            .field("extension_data", &self.extension_data)
            .finish()
    }
}

impl ProviderConfig {
    /// Create a new provider configuration.
    pub fn new(
        provider_type: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            provider_type: provider_type.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorize_uri: None,
            redirect_uri: None,
            extension_data: HashMap::new(),
        }
    }

    /// Set the authorization endpoint.
    pub fn with_authorize_uri(mut self, uri: impl Into<String>) -> Self {
        self.authorize_uri = Some(uri.into());
        self
    }

    /// Set the redirect URI.
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Add a provider-specific setting.
    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extension_data.insert(key.into(), value);
        self
    }

    /// Check that the fields every provider needs are present.
    pub fn validate(&self) -> FederationResult<()> {
        if self.provider_type.trim().is_empty() {
            return Err(FederationError::ConfigError(
                "Provider type not configured".to_string(),
            ));
        }
        if self.client_id.trim().is_empty() {
            return Err(FederationError::ConfigError(
                "Client ID not configured".to_string(),
            ));
        }
        if self.client_secret.trim().is_empty() {
            return Err(FederationError::ConfigError(
                "Client secret not configured".to_string(),
            ));
        }
        Ok(())
    }

    /// String-valued extension setting.
    pub fn extension_str(&self, key: &str) -> Option<&str> {
        self.extension_data.get(key).and_then(|v| v.as_str())
    }

    /// Boolean extension setting, `false` when absent.
    pub fn extension_bool(&self, key: &str) -> bool {
        self.extension_data
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Administrative policy applied when resolving remote logins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginPolicy {
    /// Refuse first-time remote logins that would need a new account
    #[serde(default)]
    pub disallow_remote_only_accounts: bool,

    /// Prefer the remote real name over the remote username for new accounts
    #[serde(default)]
    pub use_real_name_as_username: bool,

    /// Bind a first-time remote login to an existing local account with the
    /// same name.
    ///
    /// Security-sensitive: anyone controlling a remote account with a given
    /// name takes over the local account of that name.
    #[serde(default)]
    pub migrate_users_by_username: bool,

    /// Groups granted to accounts logging in through this provider
    #[serde(default)]
    pub auto_populate_groups: Vec<String>,
}

/// Per-provider overrides of the global [`LoginPolicy`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverrides {
    /// Overrides [`LoginPolicy::disallow_remote_only_accounts`]
    #[serde(default)]
    pub disallow_remote_only_accounts: Option<bool>,
    /// Overrides [`LoginPolicy::use_real_name_as_username`]
    #[serde(default)]
    pub use_real_name_as_username: Option<bool>,
    /// Overrides [`LoginPolicy::migrate_users_by_username`]
    #[serde(default)]
    pub migrate_users_by_username: Option<bool>,
    /// Replaces [`LoginPolicy::auto_populate_groups`]
    #[serde(default)]
    pub auto_populate_groups: Option<Vec<String>>,
}

impl PolicyOverrides {
    /// Overlay these overrides on the global policy.
    pub fn apply(&self, global: &LoginPolicy) -> LoginPolicy {
        LoginPolicy {
            disallow_remote_only_accounts: self
                .disallow_remote_only_accounts
                .unwrap_or(global.disallow_remote_only_accounts),
            use_real_name_as_username: self
                .use_real_name_as_username
                .unwrap_or(global.use_real_name_as_username),
            migrate_users_by_username: self
                .migrate_users_by_username
                .unwrap_or(global.migrate_users_by_username),
            auto_populate_groups: self
                .auto_populate_groups
                .clone()
                .unwrap_or_else(|| global.auto_populate_groups.clone()),
        }
    }
}

/// Full configuration of one federated login entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Identifier of this provider configuration; part of every mapping key
    pub provider_id: String,

    /// Provider settings
    pub provider: ProviderConfig,

    /// Global login policy
    #[serde(default)]
    pub policy: LoginPolicy,

    /// Provider-level policy overrides
    #[serde(default)]
    pub overrides: PolicyOverrides,
}

impl FederationConfig {
    /// Create a configuration with the default policy.
    pub fn new(provider_id: impl Into<String>, provider: ProviderConfig) -> Self {
        Self {
            provider_id: provider_id.into(),
            provider,
            policy: LoginPolicy::default(),
            overrides: PolicyOverrides::default(),
        }
    }

    /// Set the global policy.
    pub fn with_policy(mut self, policy: LoginPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set provider-level overrides.
    pub fn with_overrides(mut self, overrides: PolicyOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// The policy in force for this provider.
    pub fn effective_policy(&self) -> LoginPolicy {
        self.overrides.apply(&self.policy)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> FederationResult<()> {
        if self.provider_id.trim().is_empty() {
            return Err(FederationError::ConfigError(
                "Provider ID not configured".to_string(),
            ));
        }
        self.provider.validate()
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FEDERATION_PROVIDER_TYPE`: registered provider type (default: oauth2)
    /// - `FEDERATION_PROVIDER_ID`: configuration ID (default: the provider type)
    /// - `FEDERATION_CLIENT_ID` / `FEDERATION_CLIENT_SECRET`: OAuth client credentials
    /// - `FEDERATION_AUTHORIZE_URI`: authorization endpoint
    /// - `FEDERATION_REDIRECT_URI`: callback URL
    /// - `FEDERATION_TOKEN_URI` / `FEDERATION_USERINFO_URI`: OAuth2 endpoints
    /// - `FEDERATION_DISALLOW_REMOTE_ONLY_ACCOUNTS`: policy toggle (default: false)
    /// - `FEDERATION_USE_REAL_NAME_AS_USERNAME`: policy toggle (default: false)
    /// - `FEDERATION_MIGRATE_USERS_BY_USERNAME`: policy toggle (default: false)
    /// - `FEDERATION_AUTO_POPULATE_GROUPS`: comma-separated group list
    pub fn from_env() -> FederationResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> FederationResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider_type =
            lookup("FEDERATION_PROVIDER_TYPE").unwrap_or_else(|| "oauth2".to_string());
        let provider_id =
            lookup("FEDERATION_PROVIDER_ID").unwrap_or_else(|| provider_type.clone());

        let mut provider = ProviderConfig::new(
            provider_type,
            lookup("FEDERATION_CLIENT_ID").unwrap_or_default(),
            lookup("FEDERATION_CLIENT_SECRET").unwrap_or_default(),
        );
        provider.authorize_uri = lookup("FEDERATION_AUTHORIZE_URI");
        provider.redirect_uri = lookup("FEDERATION_REDIRECT_URI");
        for (var, key) in [
            ("FEDERATION_TOKEN_URI", "token_uri"),
            ("FEDERATION_USERINFO_URI", "userinfo_uri"),
        ] {
            if let Some(value) = lookup(var) {
                provider
                    .extension_data
                    .insert(key.to_string(), serde_json::Value::String(value));
            }
        }

        let policy = LoginPolicy {
            disallow_remote_only_accounts: parse_flag(
                lookup("FEDERATION_DISALLOW_REMOTE_ONLY_ACCOUNTS"),
            ),
            use_real_name_as_username: parse_flag(lookup("FEDERATION_USE_REAL_NAME_AS_USERNAME")),
            migrate_users_by_username: parse_flag(lookup("FEDERATION_MIGRATE_USERS_BY_USERNAME")),
            auto_populate_groups: lookup("FEDERATION_AUTO_POPULATE_GROUPS")
                .map(|groups| {
                    groups
                        .split(',')
                        .map(str::trim)
                        .filter(|g| !g.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        };

        let config = Self::new(provider_id, provider).with_policy(policy);
        config.validate()?;
        Ok(config)
    }
}

fn parse_flag(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::trim),
        Some("1") | Some("true") | Some("TRUE") | Some("yes")
    )
}
