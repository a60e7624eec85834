//! Account resolution.
//!
//! Deciding which local account a remote login maps to is a pure function of
//! what storage and the current session report. The orchestrator gathers the
//! inputs, calls [`resolve`], and then commits the outcome.

use crate::accounts::{normalize_name, LocalUser};
use crate::config::LoginPolicy;
use crate::error::ContinuationFailure;
use crate::provider::RemoteIdentity;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which local account a remote login resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum Resolution {
    /// A mapping already links the remote identity to this account
    ExistingMapping(Uuid),

    /// The remote identity is linked to the locally logged-in account
    AttachToLoggedInUser(Uuid),

    /// A new account should be created under this name
    CreateNew(String),

    /// The remote identity takes over the existing account of the same name
    UsurpExisting(Uuid),
}

impl Resolution {
    /// Local account ID, absent until a new account is created.
    pub fn account_id(&self) -> Option<Uuid> {
        match self {
            Resolution::ExistingMapping(id)
            | Resolution::AttachToLoggedInUser(id)
            | Resolution::UsurpExisting(id) => Some(*id),
            Resolution::CreateNew(_) => None,
        }
    }

    /// Short label for logs and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::ExistingMapping(_) => "existing_mapping",
            Resolution::AttachToLoggedInUser(_) => "attach_to_logged_in_user",
            Resolution::CreateNew(_) => "create_new",
            Resolution::UsurpExisting(_) => "usurp_existing",
        }
    }
}

/// Facts gathered before resolving.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionInputs<'a> {
    /// Account mapped to (provider, remote username)
    pub mapped_account: Option<Uuid>,

    /// User logged in to the current local session
    pub current_user: Option<&'a LocalUser>,

    /// Normalized name a new account would get
    pub desired_name: &'a str,

    /// Existing account holding `desired_name`
    pub desired_name_owner: Option<Uuid>,
}

/// Whether [`resolve`] can reach the name-owner branch for these facts.
///
/// Lets callers skip the account lookup when its result cannot matter.
pub fn needs_name_owner(
    mapped_account: Option<Uuid>,
    current_user: Option<&LocalUser>,
    policy: &LoginPolicy,
) -> bool {
    mapped_account.is_none()
        && current_user.is_none()
        && !policy.disallow_remote_only_accounts
        && policy.migrate_users_by_username
}

/// Name a new account would get for this identity.
///
/// The real name is preferred when the policy asks for it and the provider
/// supplied a non-empty one.
pub fn desired_name(remote_username: &str, identity: &RemoteIdentity, policy: &LoginPolicy) -> String {
    let real_name = identity
        .real_name
        .as_deref()
        .filter(|name| !name.is_empty());

    match real_name {
        Some(real_name) if policy.use_real_name_as_username => normalize_name(real_name),
        _ => normalize_name(remote_username),
    }
}

/// Apply the resolution priority order.
///
/// 1. An existing mapping wins.
/// 2. Otherwise a logged-in local user gets the remote identity attached.
/// 3. Otherwise a new account is needed: refused when remote-only accounts
///    are disabled, bound to the same-named account when migration by
///    username is on, or created under the desired name.
///
/// `CreateNew` carries the desired name, not yet checked for uniqueness.
pub fn resolve(
    inputs: &ResolutionInputs<'_>,
    policy: &LoginPolicy,
) -> Result<Resolution, ContinuationFailure> {
    if let Some(id) = inputs.mapped_account {
        return Ok(Resolution::ExistingMapping(id));
    }

    if let Some(user) = inputs.current_user {
        return Ok(Resolution::AttachToLoggedInUser(user.id));
    }

    if policy.disallow_remote_only_accounts {
        return Err(ContinuationFailure::RemoteOnlyAccountsDisabled);
    }

    match inputs.desired_name_owner {
        // Binds by name equality alone; see LoginPolicy::migrate_users_by_username.
        Some(owner) if policy.migrate_users_by_username => Ok(Resolution::UsurpExisting(owner)),
        _ => Ok(Resolution::CreateNew(inputs.desired_name.to_string())),
    }
}
