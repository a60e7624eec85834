//! Error types for federation login
//!
//! This module defines the error taxonomy for the remote login handshake:
//! configuration problems, initiation failures, continuation failures and
//! mapping conflicts, plus the infrastructure errors of the collaborators.

use thiserror::Error;

/// Message shown when a provider rejects a login without giving a reason.
pub const GENERIC_AUTHENTICATION_FAILURE: &str =
    "Authentication with the remote provider failed";

/// Why the second leg of a login could not be completed.
///
/// The `Display` output is the message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContinuationFailure {
    /// The continuation token was already taken by another request
    #[error("This login attempt has already been used; please start the login again")]
    TokenConsumed,

    /// The provider or a login gate refused the remote identity
    #[error("{0}")]
    Rejected(String),

    /// Remote username missing or not a valid local account name
    #[error("The remote provider returned a missing or invalid username")]
    InvalidUsername,

    /// First-time login would create a remote-only account, which is disabled
    #[error("Creating accounts through remote login is disabled")]
    RemoteOnlyAccountsDisabled,

    /// Every candidate name derived from the base name is taken
    #[error("Unable to find a unique username based on \"{0}\"")]
    NameExhausted(String),
}

/// Federation error types.
#[derive(Debug, Error)]
pub enum FederationError {
    /// Provider configuration is missing or malformed
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No provider is registered for the configured type
    #[error("Unknown provider type: {0}")]
    UnknownProvider(String),

    /// The provider could not produce a redirect target
    #[error("Could not initiate remote login: {0}")]
    InitiationError(String),

    /// The returning leg of the login failed
    #[error("{0}")]
    ContinuationError(ContinuationFailure),

    /// A mapping for the same provider and remote username already exists
    #[error("Remote account {remote_username} is already linked for provider {provider_id}")]
    ResolutionConflict {
        /// Provider configuration ID
        provider_id: String,
        /// Normalized remote username
        remote_username: String,
    },

    /// Post-creation linkage could not be completed
    #[error("Could not finish linking the new account: {0}")]
    FinalizationError(String),

    /// The remote provider failed while talking to it
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Session storage failure
    #[error("Session error: {0}")]
    SessionError(String),

    /// Account or mapping storage failure
    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Result type for federation operations.
pub type FederationResult<T> = Result<T, FederationError>;

impl From<ContinuationFailure> for FederationError {
    fn from(failure: ContinuationFailure) -> Self {
        FederationError::ContinuationError(failure)
    }
}

impl FederationError {
    /// Check if this error is turned into a failed login result at the
    /// orchestrator boundary instead of being propagated.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FederationError::InitiationError(_)
                | FederationError::ContinuationError(_)
                | FederationError::ResolutionConflict { .. }
                | FederationError::FinalizationError(_)
                | FederationError::ProviderError(_)
        )
    }

    /// Check if this error should be logged at error level.
    ///
    /// Rejections and policy denials are expected outcomes.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            FederationError::ConfigError(_)
                | FederationError::UnknownProvider(_)
                | FederationError::FinalizationError(_)
                | FederationError::SessionError(_)
                | FederationError::StorageError(_)
        )
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            FederationError::ContinuationError(failure) => match failure {
                ContinuationFailure::TokenConsumed => 400,
                ContinuationFailure::Rejected(_) | ContinuationFailure::InvalidUsername => 401,
                ContinuationFailure::RemoteOnlyAccountsDisabled => 403,
                ContinuationFailure::NameExhausted(_) => 409,
            },
            FederationError::ResolutionConflict { .. } => 409,
            FederationError::InitiationError(_) | FederationError::ProviderError(_) => 502,

            FederationError::ConfigError(_)
            | FederationError::UnknownProvider(_)
            | FederationError::FinalizationError(_)
            | FederationError::SessionError(_)
            | FederationError::StorageError(_) => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            FederationError::ConfigError(_) => "CONFIG_ERROR",
            FederationError::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            FederationError::InitiationError(_) => "INITIATION_ERROR",
            FederationError::ContinuationError(failure) => match failure {
                ContinuationFailure::TokenConsumed => "CONTINUATION_TOKEN_CONSUMED",
                ContinuationFailure::Rejected(_) => "REMOTE_IDENTITY_REJECTED",
                ContinuationFailure::InvalidUsername => "INVALID_REMOTE_USERNAME",
                ContinuationFailure::RemoteOnlyAccountsDisabled => "REMOTE_ONLY_ACCOUNTS_DISABLED",
                ContinuationFailure::NameExhausted(_) => "UNIQUE_NAME_EXHAUSTED",
            },
            FederationError::ResolutionConflict { .. } => "RESOLUTION_CONFLICT",
            FederationError::FinalizationError(_) => "FINALIZATION_ERROR",
            FederationError::ProviderError(_) => "PROVIDER_ERROR",
            FederationError::SessionError(_) => "SESSION_ERROR",
            FederationError::StorageError(_) => "STORAGE_ERROR",
        }
    }

    /// The continuation failure carried by this error, if any.
    pub fn continuation_failure(&self) -> Option<&ContinuationFailure> {
        match self {
            FederationError::ContinuationError(failure) => Some(failure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(FederationError::InitiationError("no url".into()).is_recoverable());
        assert!(FederationError::from(ContinuationFailure::InvalidUsername).is_recoverable());
        assert!(FederationError::ResolutionConflict {
            provider_id: "forum".into(),
            remote_username: "Alice".into(),
        }
        .is_recoverable());

        assert!(!FederationError::ConfigError("missing client id".into()).is_recoverable());
        assert!(!FederationError::StorageError("down".into()).is_recoverable());
    }

    #[test]
    fn test_continuation_messages_are_user_facing() {
        let err = FederationError::from(ContinuationFailure::RemoteOnlyAccountsDisabled);
        assert_eq!(
            err.to_string(),
            "Creating accounts through remote login is disabled"
        );

        let err = FederationError::from(ContinuationFailure::Rejected(
            "Please link your game account first.".into(),
        ));
        assert_eq!(err.to_string(), "Please link your game account first.");
    }

    #[test]
    fn test_status_and_error_codes() {
        let policy = FederationError::from(ContinuationFailure::RemoteOnlyAccountsDisabled);
        assert_eq!(policy.status_code(), 403);
        assert_eq!(policy.error_code(), "REMOTE_ONLY_ACCOUNTS_DISABLED");

        let consumed = FederationError::from(ContinuationFailure::TokenConsumed);
        assert_eq!(consumed.status_code(), 400);
        assert_eq!(
            consumed.continuation_failure(),
            Some(&ContinuationFailure::TokenConsumed)
        );

        let config = FederationError::ConfigError("x".into());
        assert_eq!(config.status_code(), 500);
        assert!(config.is_server_error());
        assert!(config.continuation_failure().is_none());
    }
}
