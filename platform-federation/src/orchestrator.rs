//! Login orchestrator
//!
//! Drives the two-leg remote login. The first leg ([`Orchestrator::initiate`])
//! asks the provider for an authorization URL and parks the continuation
//! token in the session. The second leg ([`Orchestrator::continue_login`])
//! takes the token back out, fetches the remote identity and resolves it to
//! a local account.
//!
//! ```text
//! Idle -> Initiated -> Continuing -> Resolved
//!   |                      |
//!   +------> Failed <------+
//! ```
//!
//! The continuation token is single-use: it is taken atomically on entry to
//! the second leg and the session is saved on exit whatever the outcome.

use crate::accounts::{normalize_name, AccountStore, LocalUser};
use crate::config::{FederationConfig, LoginPolicy};
use crate::error::{
    ContinuationFailure, FederationError, FederationResult, GENERIC_AUTHENTICATION_FAILURE,
};
use crate::hooks::{GateDecision, LoginHooks, NoHooks};
use crate::mapping::{IdentityMapping, MappingStore};
use crate::naming::UniqueNameResolver;
use crate::notify::{NoopSink, NotificationSink};
use crate::provider::{
    CallbackParams, ContinuationToken, IdentityFetch, Provider, ProviderRegistry, RemoteIdentity,
};
use crate::resolution::{self, desired_name, needs_name_owner, Resolution, ResolutionInputs};
use crate::session::{
    get_json, set_json, take_json, SessionStore, CONTINUATION_KEY, REMOTE_USERNAME_KEY,
};
use platform_events::FederationEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Phase of one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    /// No login in progress
    Idle,
    /// Token persisted, browser sent to the provider
    Initiated,
    /// Token taken back out of the session
    Continuing,
    /// A local identity was decided
    Resolved,
    /// The attempt ended with an error
    Failed,
}

impl LoginState {
    /// Check whether `next` may follow this state.
    pub fn can_transition_to(self, next: LoginState) -> bool {
        matches!(
            (self, next),
            (LoginState::Idle, LoginState::Initiated)
                | (LoginState::Idle, LoginState::Failed)
                | (LoginState::Initiated, LoginState::Continuing)
                | (LoginState::Continuing, LoginState::Resolved)
                | (LoginState::Continuing, LoginState::Failed)
        )
    }

    /// Whether the attempt is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, LoginState::Resolved | LoginState::Failed)
    }
}

/// What one request knows about its caller.
#[derive(Clone, Copy)]
pub struct RequestContext<'a> {
    /// The caller's session
    pub session: &'a dyn SessionStore,

    /// User logged in locally, if any
    pub current_user: Option<&'a LocalUser>,
}

impl<'a> RequestContext<'a> {
    /// Context of an anonymous request.
    pub fn new(session: &'a dyn SessionStore) -> Self {
        Self {
            session,
            current_user: None,
        }
    }

    /// Set the locally logged-in user.
    pub fn with_user(mut self, user: &'a LocalUser) -> Self {
        self.current_user = Some(user);
        self
    }
}

/// Local identity a remote login resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// Local account ID; `None` until a new account is created
    pub account_id: Option<Uuid>,

    /// Local account name
    pub username: String,

    /// Real name reported by the provider
    pub real_name: Option<String>,

    /// Email reported by the provider
    pub email: Option<String>,

    /// How the account was resolved
    pub resolution: Resolution,
}

/// Outcome of [`Orchestrator::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LoginResult {
    /// Send the browser to the remote provider
    Redirect {
        /// Authorization URL
        authorize_url: String,
    },

    /// The remote login resolved to a local identity
    Authenticated(AuthenticatedUser),

    /// The attempt failed; show `message` to the user
    Failed {
        /// User-facing message
        message: String,
    },
}

/// Remote login state machine for one provider configuration.
pub struct Orchestrator {
    provider_id: String,
    policy: LoginPolicy,
    provider: Arc<dyn Provider>,
    accounts: Arc<dyn AccountStore>,
    mappings: Arc<dyn MappingStore>,
    sink: Arc<dyn NotificationSink>,
    hooks: Arc<dyn LoginHooks>,
    names: UniqueNameResolver,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("provider_id", &self.provider_id)
            .field("provider", &self.provider.kind())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build an orchestrator.
    ///
    /// The provider is constructed here, so configuration problems surface
    /// before any network call.
    pub fn new(
        config: &FederationConfig,
        registry: &ProviderRegistry,
        accounts: Arc<dyn AccountStore>,
        mappings: Arc<dyn MappingStore>,
    ) -> FederationResult<Self> {
        if config.provider_id.trim().is_empty() {
            return Err(FederationError::ConfigError(
                "Provider ID not configured".to_string(),
            ));
        }
        let provider = registry.build(&config.provider)?;

        info!(
            provider_id = %config.provider_id,
            provider_type = %provider.kind(),
            "Federated login configured"
        );

        Ok(Self {
            provider_id: config.provider_id.clone(),
            policy: config.effective_policy(),
            provider,
            accounts,
            mappings,
            sink: Arc::new(NoopSink),
            hooks: Arc::new(NoHooks),
            names: UniqueNameResolver::default(),
        })
    }

    /// Set the notification sink.
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Set the login hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn LoginHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set the unique-name resolver.
    pub fn with_name_resolver(mut self, names: UniqueNameResolver) -> Self {
        self.names = names;
        self
    }

    /// Provider configuration ID.
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Effective login policy.
    pub fn policy(&self) -> &LoginPolicy {
        &self.policy
    }

    /// Phase of the login attempt held by this session.
    pub async fn state(&self, ctx: &RequestContext<'_>) -> FederationResult<LoginState> {
        Ok(match ctx.session.get(CONTINUATION_KEY).await? {
            Some(_) => LoginState::Initiated,
            None => LoginState::Idle,
        })
    }

    /// Handle a login request, starting or continuing the handshake.
    ///
    /// Recoverable failures become [`LoginResult::Failed`]; configuration,
    /// session and storage errors are returned as `Err`.
    pub async fn authenticate(
        &self,
        ctx: &RequestContext<'_>,
        callback: &CallbackParams,
    ) -> FederationResult<LoginResult> {
        let result = match self.state(ctx).await? {
            LoginState::Initiated => self
                .continue_login(ctx, callback)
                .await
                .map(LoginResult::Authenticated),
            _ => self
                .initiate(ctx)
                .await
                .map(|authorize_url| LoginResult::Redirect { authorize_url }),
        };

        match result {
            Ok(result) => Ok(result),
            Err(e) if e.is_recoverable() => Ok(LoginResult::Failed {
                message: user_message(&e),
            }),
            Err(e) => {
                error!(provider_id = %self.provider_id, error = %e, "Federated login failed");
                Err(e)
            }
        }
    }

    /// First leg: persist a continuation token and return the URL to send the
    /// browser to.
    #[instrument(skip(self, ctx), fields(provider_id = %self.provider_id))]
    pub async fn initiate(&self, ctx: &RequestContext<'_>) -> FederationResult<String> {
        let request = match self.provider.login().await {
            Ok(request) => request,
            Err(e) => {
                self.transition(LoginState::Idle, LoginState::Failed);
                warn!(provider_id = %self.provider_id, error = %e, "Provider could not start login");
                return Err(match e {
                    FederationError::ConfigError(_) | FederationError::InitiationError(_) => e,
                    other => FederationError::InitiationError(other.to_string()),
                });
            }
        };

        if request.authorize_url.trim().is_empty() {
            self.transition(LoginState::Idle, LoginState::Failed);
            return Err(FederationError::InitiationError(
                "provider returned no authorization URL".to_string(),
            ));
        }

        set_json(ctx.session, CONTINUATION_KEY, &request.token).await?;
        ctx.session.save().await?;

        self.transition(LoginState::Idle, LoginState::Initiated);
        Ok(request.authorize_url)
    }

    /// Second leg: consume the continuation token and resolve the remote
    /// identity to a local account.
    ///
    /// The token is gone from the session when this returns, whether it
    /// succeeded or not.
    #[instrument(skip(self, ctx, callback), fields(provider_id = %self.provider_id))]
    pub async fn continue_login(
        &self,
        ctx: &RequestContext<'_>,
        callback: &CallbackParams,
    ) -> FederationResult<AuthenticatedUser> {
        let mut phase = LoginState::Idle;
        let outcome = match take_json::<ContinuationToken>(ctx.session, CONTINUATION_KEY).await {
            Ok(Some(token)) => {
                self.transition(LoginState::Initiated, LoginState::Continuing);
                phase = LoginState::Continuing;
                self.resolve_remote_login(ctx, &token, callback).await
            }
            Ok(None) => {
                debug!("No continuation token in session");
                Err(ContinuationFailure::TokenConsumed.into())
            }
            Err(e) => Err(e),
        };

        let saved = ctx.session.save().await;

        match (outcome, saved) {
            (Ok(user), Ok(())) => {
                self.transition(phase, LoginState::Resolved);
                info!(
                    resolution = user.resolution.as_str(),
                    username = %user.username,
                    "Remote login resolved"
                );
                Ok(user)
            }
            (Err(e), _) | (Ok(_), Err(e)) => {
                self.transition(phase, LoginState::Failed);
                Err(e)
            }
        }
    }

    async fn resolve_remote_login(
        &self,
        ctx: &RequestContext<'_>,
        token: &ContinuationToken,
        callback: &CallbackParams,
    ) -> FederationResult<AuthenticatedUser> {
        // A pending finalization from an earlier attempt must not leak into this one
        ctx.session.remove(REMOTE_USERNAME_KEY).await?;

        let mut identity = match self.provider.fetch_identity(token, callback).await? {
            IdentityFetch::Identity(identity) => identity,
            IdentityFetch::Rejected { reason } => return Err(self.reject(None, reason).await),
        };

        if let GateDecision::Deny(reason) = self
            .hooks
            .after_fetch_identity(&self.provider_id, &mut identity)
            .await
        {
            return Err(self.reject(identity.username.clone(), reason).await);
        }

        let remote_username = match identity.username.as_deref().map(normalize_name) {
            Some(name) if self.accounts.is_valid_name(&name) => name,
            _ => {
                warn!(provider_id = %self.provider_id, "Remote identity has a missing or invalid username");
                return Err(ContinuationFailure::InvalidUsername.into());
            }
        };

        let mapped_account = self
            .mappings
            .lookup(&self.provider_id, &remote_username)
            .await?;
        let desired = desired_name(&remote_username, &identity, &self.policy);
        let desired_name_owner =
            if needs_name_owner(mapped_account, ctx.current_user, &self.policy) {
                self.accounts.id_for_name(&desired).await?
            } else {
                None
            };

        let inputs = ResolutionInputs {
            mapped_account,
            current_user: ctx.current_user,
            desired_name: &desired,
            desired_name_owner,
        };
        let resolution = match resolution::resolve(&inputs, &self.policy) {
            Ok(resolution) => resolution,
            Err(failure) => {
                if failure == ContinuationFailure::RemoteOnlyAccountsDisabled {
                    warn!(
                        provider_id = %self.provider_id,
                        remote_username = %remote_username,
                        "Refused to create a remote-only account"
                    );
                    self.sink
                        .notify(FederationEvent::RemoteOnlyCreationDenied {
                            provider_id: self.provider_id.clone(),
                            remote_username: remote_username.clone(),
                        })
                        .await;
                }
                return Err(failure.into());
            }
        };

        self.commit(ctx, resolution, &remote_username, &desired, identity)
            .await
    }

    async fn commit(
        &self,
        ctx: &RequestContext<'_>,
        resolution: Resolution,
        remote_username: &str,
        desired: &str,
        identity: RemoteIdentity,
    ) -> FederationResult<AuthenticatedUser> {
        let (resolution, username) = match resolution {
            Resolution::ExistingMapping(id) => {
                let username = self.accounts.name_for_id(id).await?.ok_or_else(|| {
                    FederationError::StorageError(format!("mapped account {} does not exist", id))
                })?;
                (Resolution::ExistingMapping(id), username)
            }
            Resolution::AttachToLoggedInUser(id) => {
                let username = match ctx.current_user {
                    Some(user) => user.name.clone(),
                    None => self.accounts.name_for_id(id).await?.unwrap_or_default(),
                };
                self.link(id, remote_username).await?;
                (Resolution::AttachToLoggedInUser(id), username)
            }
            Resolution::UsurpExisting(id) => {
                warn!(
                    provider_id = %self.provider_id,
                    remote_username = %remote_username,
                    account = %desired,
                    "Binding remote identity to existing account by name"
                );
                self.link(id, remote_username).await?;
                self.finalize(id).await?;
                (Resolution::UsurpExisting(id), desired.to_string())
            }
            Resolution::CreateNew(base) => {
                let name = self.names.resolve(self.accounts.as_ref(), &base).await?;
                set_json(ctx.session, REMOTE_USERNAME_KEY, &remote_username).await?;
                (Resolution::CreateNew(name.clone()), name)
            }
        };

        Ok(AuthenticatedUser {
            account_id: resolution.account_id(),
            username,
            real_name: identity.real_name,
            email: identity.email,
            resolution,
        })
    }

    /// Link a newly created account to the remote identity of this session.
    ///
    /// Called once the account collaborator has created the account for a
    /// [`Resolution::CreateNew`] outcome.
    #[instrument(skip(self, ctx), fields(provider_id = %self.provider_id))]
    pub async fn complete_account_creation(
        &self,
        ctx: &RequestContext<'_>,
        account_id: Uuid,
    ) -> FederationResult<()> {
        let outcome = match take_json::<String>(ctx.session, REMOTE_USERNAME_KEY).await {
            Ok(Some(remote_username)) => match self.link(account_id, &remote_username).await {
                Ok(()) => self.finalize(account_id).await,
                Err(e) => Err(e),
            },
            Ok(None) => Err(FederationError::FinalizationError(
                "no remote username in session".to_string(),
            )),
            Err(e) => Err(e),
        };

        let saved = ctx.session.save().await;
        outcome.and(saved)
    }

    /// Create the local account for a [`Resolution::CreateNew`] outcome and
    /// link it. Returns the account ID, which for other outcomes already
    /// exists.
    ///
    /// Losing a race against another session of the same remote user, either
    /// on the mapping or on the account name, is a
    /// [`FederationError::ResolutionConflict`]. An account created here whose
    /// mapping could not be inserted is removed again.
    #[instrument(skip(self, ctx, user), fields(provider_id = %self.provider_id))]
    pub async fn provision_account(
        &self,
        ctx: &RequestContext<'_>,
        user: &AuthenticatedUser,
    ) -> FederationResult<Uuid> {
        let name = match &user.resolution {
            Resolution::CreateNew(name) => name,
            resolution => {
                return resolution.account_id().ok_or_else(|| {
                    FederationError::FinalizationError("resolution has no account".to_string())
                })
            }
        };

        let Some(remote_username) = get_json::<String>(ctx.session, REMOTE_USERNAME_KEY).await?
        else {
            return Err(FederationError::FinalizationError(
                "no remote username in session".to_string(),
            ));
        };

        if self
            .mappings
            .lookup(&self.provider_id, &remote_username)
            .await?
            .is_some()
        {
            return self.abandon_pending(ctx, &remote_username).await;
        }

        let account_id = match self.accounts.create_account(name).await {
            Ok(account_id) => account_id,
            Err(e) => {
                if self.accounts.id_for_name(name).await?.is_some() {
                    debug!(username = %name, error = %e, "Account name taken by a concurrent login");
                    return self.abandon_pending(ctx, &remote_username).await;
                }
                return Err(e);
            }
        };
        info!(account_id = %account_id, username = %name, "Created account for remote login");

        if let Err(e) = self.complete_account_creation(ctx, account_id).await {
            let linked = self
                .mappings
                .lookup(&self.provider_id, &remote_username)
                .await?
                == Some(account_id);
            if !linked {
                warn!(account_id = %account_id, error = %e, "Removing unlinked account");
                self.accounts.remove_account(account_id).await?;
            }
            return Err(e);
        }
        Ok(account_id)
    }

    /// Drop the pending remote username after losing a first-login race.
    async fn abandon_pending<T>(
        &self,
        ctx: &RequestContext<'_>,
        remote_username: &str,
    ) -> FederationResult<T> {
        ctx.session.remove(REMOTE_USERNAME_KEY).await?;
        ctx.session.save().await?;
        warn!(
            provider_id = %self.provider_id,
            remote_username = %remote_username,
            "Remote identity was linked by a concurrent login"
        );
        Err(FederationError::ResolutionConflict {
            provider_id: self.provider_id.clone(),
            remote_username: remote_username.to_string(),
        })
    }

    /// Log a user out of the remote provider. Never fails.
    pub async fn deauthenticate(&self, user: &LocalUser) {
        self.hooks.before_logout(user).await;
        if let Err(e) = self.provider.logout(user).await {
            warn!(
                provider_id = %self.provider_id,
                user = %user.name,
                error = %e,
                "Remote logout failed"
            );
        }
    }

    /// Groups a user logging in through this provider should be added to.
    pub async fn groups_for(&self, user: &LocalUser) -> Vec<String> {
        if self.policy.auto_populate_groups.is_empty() {
            return Vec::new();
        }
        if !self.hooks.before_auto_populate_groups(user).await {
            debug!(user = %user.name, "Group auto-population vetoed");
            return Vec::new();
        }
        self.policy.auto_populate_groups.clone()
    }

    async fn link(&self, account_id: Uuid, remote_username: &str) -> FederationResult<()> {
        self.mappings
            .insert(IdentityMapping::new(
                account_id,
                remote_username,
                &self.provider_id,
            ))
            .await?;
        let mapping_count = self.mappings.count_for_account(account_id).await?;

        info!(
            provider_id = %self.provider_id,
            remote_username = %remote_username,
            account_id = %account_id,
            "Linked remote identity"
        );
        self.sink
            .notify(FederationEvent::MappingCreated {
                provider_id: self.provider_id.clone(),
                remote_username: remote_username.to_string(),
                account_id,
                mapping_count,
            })
            .await;
        Ok(())
    }

    async fn finalize(&self, account_id: Uuid) -> FederationResult<()> {
        self.provider
            .finalize(account_id)
            .await
            .map_err(|e| FederationError::FinalizationError(e.to_string()))
    }

    async fn reject(&self, remote_username: Option<String>, reason: Option<String>) -> FederationError {
        warn!(
            provider_id = %self.provider_id,
            remote_username = ?remote_username,
            reason = ?reason,
            "Remote identity rejected"
        );
        self.sink
            .notify(FederationEvent::IdentityRejected {
                provider_id: self.provider_id.clone(),
                remote_username,
                reason: reason.clone(),
            })
            .await;

        ContinuationFailure::Rejected(
            reason.unwrap_or_else(|| GENERIC_AUTHENTICATION_FAILURE.to_string()),
        )
        .into()
    }

    fn transition(&self, from: LoginState, to: LoginState) {
        debug_assert!(from.can_transition_to(to));
        debug!(provider_id = %self.provider_id, from = ?from, to = ?to, "Login state transition");
    }
}

fn user_message(error: &FederationError) -> String {
    match error {
        FederationError::ContinuationError(failure) => failure.to_string(),
        FederationError::InitiationError(_) | FederationError::ProviderError(_) => {
            GENERIC_AUTHENTICATION_FAILURE.to_string()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(LoginState::Idle.can_transition_to(LoginState::Initiated));
        assert!(LoginState::Idle.can_transition_to(LoginState::Failed));
        assert!(LoginState::Initiated.can_transition_to(LoginState::Continuing));
        assert!(LoginState::Continuing.can_transition_to(LoginState::Resolved));
        assert!(LoginState::Continuing.can_transition_to(LoginState::Failed));

        assert!(!LoginState::Idle.can_transition_to(LoginState::Resolved));
        assert!(!LoginState::Resolved.can_transition_to(LoginState::Initiated));
        assert!(!LoginState::Failed.can_transition_to(LoginState::Continuing));
    }

    #[test]
    fn test_terminal_states() {
        assert!(LoginState::Resolved.is_terminal());
        assert!(LoginState::Failed.is_terminal());
        assert!(!LoginState::Initiated.is_terminal());
    }

    #[test]
    fn test_user_message_hides_provider_internals() {
        let provider = FederationError::ProviderError("connection reset by 10.0.0.3".into());
        assert_eq!(user_message(&provider), GENERIC_AUTHENTICATION_FAILURE);

        let denied = FederationError::from(ContinuationFailure::RemoteOnlyAccountsDisabled);
        assert_eq!(user_message(&denied), denied.to_string());
    }

    #[test]
    fn test_login_result_serialization() {
        let value = serde_json::to_value(LoginResult::Redirect {
            authorize_url: "https://id.example.com/authorize".into(),
        })
        .unwrap();
        assert_eq!(value["result"], "redirect");
        assert_eq!(value["authorize_url"], "https://id.example.com/authorize");
    }
}
