//! Persisted, TTL-scoped counting semaphores.
//!
//! A scope is created by its first `take_token`, counts every take, and
//! behaves as if it never existed once its deadline passes. The store is
//! the single source of truth; nothing is cached in the sandbox.

mod database;
mod error;
mod memory;

pub use database::LibsqlTokenStore;
pub use error::{StoreError, StoreErrorKind};
pub use memory::InMemoryTokenStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A validated, non-blank scope key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// Validates `scope`.
    ///
    /// # Errors
    ///
    /// Returns an invalid scope error if `scope` is empty or whitespace.
    pub fn parse(scope: impl Into<String>) -> Result<Self, StoreError> {
        let scope = scope.into();
        if scope.trim().is_empty() {
            return Err(StoreError::invalid_scope("scope must not be blank"));
        }
        Ok(Self(scope))
    }

    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// When a scope's deadline moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlPolicy {
    /// Every take pushes the deadline to `now + ttl`.
    #[default]
    ExtendOnTake,
    /// The take that creates the scope fixes the deadline.
    FixedAtFirstTake,
}

/// Converts a guest-supplied TTL in seconds.
///
/// A TTL of zero is rejected too. Hosts that pass `0` through as an
/// already-expired scope accept it, so guests ported from them must send a
/// positive TTL here.
///
/// # Errors
///
/// Returns an invalid TTL error for zero or negative values.
pub fn ttl_from_seconds(seconds: i64) -> Result<Duration, StoreError> {
    u64::try_from(seconds)
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| StoreError::invalid_ttl(seconds))
}

/// Backing storage for token scopes.
#[async_trait]
pub trait PersistentStore: Send + Sync + fmt::Debug {
    /// Increments the counter for `scope`, creating it if missing or
    /// expired, and returns the new count.
    ///
    /// # Errors
    ///
    /// Returns a store error if the backend fails.
    async fn take_token(&self, scope: &ScopeKey, ttl: Duration) -> Result<i32, StoreError>;

    /// Clears the counter for `scope` regardless of its value.
    ///
    /// # Errors
    ///
    /// Returns a store error if the backend fails.
    async fn release_tokens(&self, scope: &ScopeKey) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_scope_is_rejected() {
        assert!(ScopeKey::parse("").unwrap_err().is_invalid_argument());
        assert!(ScopeKey::parse("   ").is_err());
        assert_eq!(ScopeKey::parse("s").unwrap().as_str(), "s");
    }

    #[test]
    fn ttl_must_be_positive() {
        assert!(ttl_from_seconds(0).is_err());
        assert!(ttl_from_seconds(-3).is_err());
        assert_eq!(ttl_from_seconds(10).unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn ttl_policy_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: TtlPolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"fixed_at_first_take\"").unwrap();
        assert_eq!(w.policy, TtlPolicy::FixedAtFirstTake);
        assert_eq!(TtlPolicy::default(), TtlPolicy::ExtendOnTake);
    }
}
