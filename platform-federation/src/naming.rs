//! Collision-free local account names.
//!
//! Probes `"<base>"`, `"<base> 1"`, `"<base> 2"`, ... against the account
//! store and returns the first free name. Running out of attempts is a hard
//! failure; the resolver never falls back to a taken or malformed name.

use crate::accounts::{normalize_name, AccountStore};
use crate::error::{ContinuationFailure, FederationResult};
use tracing::debug;

/// Total names probed, the base name included.
pub const UNIQUE_NAME_MAX_TRIES: usize = 256;

/// Deterministic linear-probe name resolver.
#[derive(Debug, Clone, Copy)]
pub struct UniqueNameResolver {
    max_tries: usize,
}

impl Default for UniqueNameResolver {
    fn default() -> Self {
        Self {
            max_tries: UNIQUE_NAME_MAX_TRIES,
        }
    }
}

impl UniqueNameResolver {
    /// Create a resolver with the default bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a resolver probing at most `max_tries` names.
    pub fn with_max_tries(max_tries: usize) -> Self {
        Self {
            max_tries: max_tries.max(1),
        }
    }

    /// Find the first free name derived from `base`.
    ///
    /// # Errors
    ///
    /// - `InvalidUsername` if the normalized base name is not a valid account name
    /// - `NameExhausted` if every probed name is taken
    pub async fn resolve(&self, accounts: &dyn AccountStore, base: &str) -> FederationResult<String> {
        let name = normalize_name(base);
        if !accounts.is_valid_name(&name) {
            return Err(ContinuationFailure::InvalidUsername.into());
        }

        if accounts.id_for_name(&name).await?.is_none() {
            return Ok(name);
        }

        for suffix in 1..self.max_tries {
            let candidate = format!("{} {}", name, suffix);
            if !accounts.is_valid_name(&candidate) {
                continue;
            }
            if accounts.id_for_name(&candidate).await?.is_none() {
                debug!(base = %name, candidate = %candidate, "Resolved unique account name");
                return Ok(candidate);
            }
        }

        Err(ContinuationFailure::NameExhausted(name).into())
    }
}
