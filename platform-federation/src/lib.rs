//! # Platform Federation
//!
//! This crate provides remote identity federation login for the Relay
//! platform: users log in through a third-party identity service and are
//! mapped onto local accounts.
//!
//! ## Overview
//!
//! The platform-federation crate handles:
//! - **Handshake**: The two-leg login (redirect out, callback back in) with a
//!   single-use continuation token held in the user's session
//! - **Providers**: Pluggable remote identity services behind the
//!   [`Provider`] trait, selected through an explicit [`ProviderRegistry`]
//! - **Account resolution**: Existing mapping, attach to the logged-in user,
//!   create a new account, or take over a same-named account
//! - **Mappings**: Durable, unique (provider, remote username) to account links
//! - **Notifications**: Security-relevant events published to `platform-events`
//!
//! ## Features
//!
//! - `oauth` (default): Generic OAuth 2.0 provider (`"oauth2"` provider type)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use platform_federation::{
//!     CallbackParams, FederationConfig, LoginResult, MemoryAccountStore, MemoryMappingStore,
//!     MemorySession, Orchestrator, ProviderRegistry, RequestContext,
//! };
//! use std::sync::Arc;
//!
//! async fn login(session: &MemorySession, callback: CallbackParams) {
//!     let config = FederationConfig::from_env().unwrap();
//!     let orchestrator = Orchestrator::new(
//!         &config,
//!         &ProviderRegistry::with_defaults(),
//!         Arc::new(MemoryAccountStore::new()),
//!         Arc::new(MemoryMappingStore::new()),
//!     )
//!     .unwrap();
//!
//!     let ctx = RequestContext::new(session);
//!     match orchestrator.authenticate(&ctx, &callback).await.unwrap() {
//!         LoginResult::Redirect { authorize_url } => println!("redirect to {}", authorize_url),
//!         LoginResult::Authenticated(user) => {
//!             let account_id = orchestrator.provision_account(&ctx, &user).await.unwrap();
//!             println!("logged in as {} ({})", user.username, account_id);
//!         }
//!         LoginResult::Failed { message } => println!("login failed: {}", message),
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! `migrate_users_by_username` binds a first-time remote login to an existing
//! local account purely because the names match. Anyone able to register that
//! name with the remote provider takes over the local account. Leave it off
//! unless the remote namespace is trusted to match the local one.

pub mod accounts;
pub mod config;
pub mod error;
pub mod hooks;
pub mod mapping;
pub mod naming;
pub mod notify;
#[cfg(feature = "oauth")]
pub mod oauth;
pub mod orchestrator;
pub mod provider;
pub mod resolution;
pub mod session;

// Re-export main types
pub use accounts::{AccountStore, LocalUser, MemoryAccountStore};
pub use config::{FederationConfig, LoginPolicy, PolicyOverrides, ProviderConfig};
pub use error::{ContinuationFailure, FederationError, FederationResult};
pub use hooks::{GateDecision, LoginHooks, NoHooks};
pub use mapping::{IdentityMapping, MappingStore, MemoryMappingStore};
pub use naming::UniqueNameResolver;
pub use notify::{EventBusSink, MemorySink, NoopSink, NotificationSink};
pub use orchestrator::{AuthenticatedUser, LoginResult, LoginState, Orchestrator, RequestContext};
pub use provider::{
    AuthorizationRequest, CallbackParams, ContinuationToken, IdentityFetch, Provider,
    ProviderRegistry, RemoteIdentity,
};
pub use resolution::Resolution;
pub use session::{MemorySession, SessionStore};

#[cfg(feature = "oauth")]
pub use oauth::{OAuth2Provider, OAuth2Settings, OAUTH2_PROVIDER_TYPE};
