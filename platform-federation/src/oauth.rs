//! Generic OAuth 2.0 provider
//!
//! Authorization-code flow against any OAuth 2.0 server exposing a user-info
//! endpoint. The CSRF state travels as the continuation token's request
//! secret; with PKCE enabled the code verifier travels as its request key.
//!
//! Provider-specific settings are read from the configuration's extension
//! data:
//! - `token_uri`, `userinfo_uri` (required)
//! - `scopes`: array or space-separated string (default: `openid profile email`)
//! - `username_claim` (default: `preferred_username`), `realname_claim`
//!   (default: `name`), `email_claim` (default: `email`), `groups_claim`
//!   (default: `groups`)
//! - `required_group`: refuse users outside this group
//! - `pkce`: send an S256 code challenge

use crate::config::ProviderConfig;
use crate::error::{FederationError, FederationResult};
use crate::provider::{
    AuthorizationRequest, CallbackParams, ContinuationToken, IdentityFetch, Provider,
    RemoteIdentity,
};
use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeVerifier, RedirectUrl,
    Scope, TokenResponse, TokenUrl,
};
use serde_json::Value;
use tracing::{debug, instrument, warn};

/// Registry key of the generic OAuth 2.0 provider.
pub const OAUTH2_PROVIDER_TYPE: &str = "oauth2";

const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email"];

/// Settings of the generic OAuth 2.0 provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth2Settings {
    /// Token endpoint
    pub token_uri: String,

    /// User-info endpoint
    pub userinfo_uri: String,

    /// Scopes to request
    pub scopes: Vec<String>,

    /// Claim holding the remote username
    pub username_claim: String,

    /// Claim holding the real name
    pub realname_claim: String,

    /// Claim holding the email address
    pub email_claim: String,

    /// Claim holding group memberships
    pub groups_claim: String,

    /// Group the remote user must belong to
    pub required_group: Option<String>,

    /// Whether to use PKCE
    pub pkce: bool,
}

impl OAuth2Settings {
    /// Read settings from a provider configuration.
    pub fn from_config(config: &ProviderConfig) -> FederationResult<Self> {
        let required = |key: &str| {
            config
                .extension_str(key)
                .filter(|v| !v.is_empty())
                .map(String::from)
                .ok_or_else(|| FederationError::ConfigError(format!("{} not configured", key)))
        };
        let claim = |key: &str, default: &str| {
            config.extension_str(key).unwrap_or(default).to_string()
        };

        Ok(Self {
            token_uri: required("token_uri")?,
            userinfo_uri: required("userinfo_uri")?,
            scopes: parse_scopes(config.extension_data.get("scopes")),
            username_claim: claim("username_claim", "preferred_username"),
            realname_claim: claim("realname_claim", "name"),
            email_claim: claim("email_claim", "email"),
            groups_claim: claim("groups_claim", "groups"),
            required_group: config
                .extension_str("required_group")
                .filter(|g| !g.is_empty())
                .map(String::from),
            pkce: config.extension_bool("pkce"),
        })
    }
}

fn parse_scopes(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        Some(Value::String(s)) => s.split_whitespace().map(String::from).collect(),
        _ => DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
    }
}

/// Generic OAuth 2.0 provider.
pub struct OAuth2Provider {
    client: BasicClient,
    settings: OAuth2Settings,
    http: reqwest::Client,
}

impl std::fmt::Debug for OAuth2Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Provider")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl OAuth2Provider {
    /// Build the provider. Fails on missing or malformed configuration.
    pub fn new(config: &ProviderConfig) -> FederationResult<Self> {
        config.validate()?;
        let settings = OAuth2Settings::from_config(config)?;

        let authorize_uri = config.authorize_uri.as_deref().ok_or_else(|| {
            FederationError::ConfigError("Authorization URL not configured".to_string())
        })?;
        let auth_url = AuthUrl::new(authorize_uri.to_string())
            .map_err(|e| FederationError::ConfigError(format!("Invalid authorization URL: {}", e)))?;
        let token_url = TokenUrl::new(settings.token_uri.clone())
            .map_err(|e| FederationError::ConfigError(format!("Invalid token URL: {}", e)))?;

        let mut client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            auth_url,
            Some(token_url),
        );
        if let Some(redirect_uri) = &config.redirect_uri {
            let redirect_url = RedirectUrl::new(redirect_uri.clone())
                .map_err(|e| FederationError::ConfigError(format!("Invalid redirect URL: {}", e)))?;
            client = client.set_redirect_uri(redirect_url);
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("platform-federation/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FederationError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            settings,
            http,
        })
    }

    /// Provider settings.
    pub fn settings(&self) -> &OAuth2Settings {
        &self.settings
    }

    /// Map a user-info document onto a remote identity.
    pub fn identity_from_claims(&self, claims: &Value) -> IdentityFetch {
        if let Some(group) = &self.settings.required_group {
            let groups = claim_groups(claims.get(&self.settings.groups_claim));
            if !groups.iter().any(|g| g == group) {
                debug!(required_group = %group, "Remote user is not in the required group");
                return IdentityFetch::rejected_with(format!(
                    "You must be a member of the {} group to log in.",
                    group
                ));
            }
        }

        let extra = claims
            .as_object()
            .map(|object| object.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        IdentityFetch::Identity(RemoteIdentity {
            username: claim_string(claims.get(&self.settings.username_claim)),
            real_name: claim_string(claims.get(&self.settings.realname_claim)),
            email: claim_string(claims.get(&self.settings.email_claim)),
            extra,
        })
    }

    async fn fetch_claims(&self, access_token: &str) -> FederationResult<Value> {
        self.http
            .get(&self.settings.userinfo_uri)
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| FederationError::ProviderError(format!("User info request failed: {}", e)))?
            .json::<Value>()
            .await
            .map_err(|e| FederationError::ProviderError(format!("Invalid user info response: {}", e)))
    }
}

#[async_trait]
impl Provider for OAuth2Provider {
    fn kind(&self) -> &str {
        OAUTH2_PROVIDER_TYPE
    }

    async fn login(&self) -> FederationResult<AuthorizationRequest> {
        let state = random_alphanumeric(32);
        let mut token = ContinuationToken::new(state.clone());

        let mut request = self.client.authorize_url(|| CsrfToken::new(state));
        for scope in &self.settings.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        if self.settings.pkce {
            let verifier = random_alphanumeric(64);
            request = request
                .add_extra_param("code_challenge", code_challenge(&verifier))
                .add_extra_param("code_challenge_method", "S256");
            token = token.with_key(verifier);
        }

        let (url, _state) = request.url();
        Ok(AuthorizationRequest {
            token,
            authorize_url: url.to_string(),
        })
    }

    #[instrument(skip(self, token, callback))]
    async fn fetch_identity(
        &self,
        token: &ContinuationToken,
        callback: &CallbackParams,
    ) -> FederationResult<IdentityFetch> {
        if let Some(error) = callback.get("error") {
            debug!(error = %error, "Remote provider returned an authorization error");
            return Ok(match callback.get("error_description") {
                Some(description) => IdentityFetch::rejected_with(description),
                None => IdentityFetch::rejected(),
            });
        }

        let state_matches = callback.get("state").is_some_and(|state| {
            constant_time_eq(state.as_bytes(), token.request_secret.as_bytes())
        });
        if !state_matches {
            warn!("OAuth state mismatch on callback");
            return Ok(IdentityFetch::rejected());
        }

        let Some(code) = callback.get("code") else {
            debug!("Callback is missing the authorization code");
            return Ok(IdentityFetch::rejected());
        };

        let mut exchange = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()));
        if self.settings.pkce {
            if let Some(verifier) = &token.request_key {
                exchange = exchange.set_pkce_verifier(PkceCodeVerifier::new(verifier.clone()));
            }
        }

        let tokens = exchange
            .request_async(async_http_client)
            .await
            .map_err(|e| FederationError::ProviderError(format!("Token exchange failed: {}", e)))?;

        let claims = self.fetch_claims(tokens.access_token().secret()).await?;
        Ok(self.identity_from_claims(&claims))
    }
}

fn random_alphanumeric(len: usize) -> String {
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Compare two secrets without an early exit on the first differing byte.
/// Only the length can leak, and generated states have a fixed length.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// S256 PKCE code challenge of a verifier.
pub fn code_challenge(verifier: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let hash = hasher.finalize();
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, hash)
}

fn claim_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn claim_groups(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| claim_string(Some(item)))
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}
