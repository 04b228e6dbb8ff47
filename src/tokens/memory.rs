//! Process-local token store.

use super::{PersistentStore, ScopeKey, StoreError, TtlPolicy};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Scope {
    count: i32,
    expires_at: Instant,
}

/// A [`PersistentStore`] kept in process memory.
///
/// Useful for tests and single-process hosts; counts are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    policy: TtlPolicy,
    scopes: Mutex<HashMap<ScopeKey, Scope>>,
}

impl InMemoryTokenStore {
    /// Creates an empty store with the default TTL policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store with `policy`.
    #[must_use]
    pub fn with_policy(policy: TtlPolicy) -> Self {
        Self {
            policy,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// The TTL policy in effect.
    #[must_use]
    pub fn policy(&self) -> TtlPolicy {
        self.policy
    }

    fn take_at(&self, scope: &ScopeKey, ttl: Duration, now: Instant) -> i32 {
        let mut scopes = self.scopes.lock();
        // Expired scopes behave as absent, so drop them all while locked.
        scopes.retain(|_, existing| existing.expires_at > now);

        let entry = scopes.entry(scope.clone()).or_insert(Scope {
            count: 0,
            expires_at: now + ttl,
        });

        entry.count = entry.count.saturating_add(1);
        if self.policy == TtlPolicy::ExtendOnTake {
            entry.expires_at = now + ttl;
        }
        entry.count
    }

    #[cfg(test)]
    fn tracked_scopes(&self) -> usize {
        self.scopes.lock().len()
    }
}

#[async_trait]
impl PersistentStore for InMemoryTokenStore {
    async fn take_token(&self, scope: &ScopeKey, ttl: Duration) -> Result<i32, StoreError> {
        Ok(self.take_at(scope, ttl, Instant::now()))
    }

    async fn release_tokens(&self, scope: &ScopeKey) -> Result<(), StoreError> {
        self.scopes.lock().remove(scope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(name: &str) -> ScopeKey {
        ScopeKey::parse(name).unwrap()
    }

    #[tokio::test]
    async fn take_counts_up() {
        let store = InMemoryTokenStore::new();
        let s = scope("s");
        assert_eq!(store.take_token(&s, Duration::from_secs(10)).await.unwrap(), 1);
        assert_eq!(store.take_token(&s, Duration::from_secs(10)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn release_resets_scope() {
        let store = InMemoryTokenStore::new();
        let s = scope("s");
        store.take_token(&s, Duration::from_secs(10)).await.unwrap();
        store.take_token(&s, Duration::from_secs(10)).await.unwrap();
        store.release_tokens(&s).await.unwrap();
        assert_eq!(store.take_token(&s, Duration::from_secs(10)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn scopes_are_independent() {
        let store = InMemoryTokenStore::new();
        store.take_token(&scope("a"), Duration::from_secs(10)).await.unwrap();
        assert_eq!(
            store.take_token(&scope("b"), Duration::from_secs(10)).await.unwrap(),
            1
        );
    }

    #[test]
    fn release_of_unknown_scope_is_ok() {
        let store = InMemoryTokenStore::new();
        tokio_test::block_on(async {
            tokio_test::assert_ok!(store.release_tokens(&scope("never-taken")).await);
            tokio_test::assert_ok!(store.take_token(&scope("never-taken"), Duration::from_secs(1)).await);
        });
    }

    #[test]
    fn expired_scopes_are_pruned() {
        let store = InMemoryTokenStore::new();
        let start = Instant::now();
        let ttl = Duration::from_secs(5);
        store.take_at(&scope("a"), ttl, start);
        store.take_at(&scope("b"), ttl, start);
        assert_eq!(store.tracked_scopes(), 2);

        store.take_at(&scope("c"), ttl, start + Duration::from_secs(10));
        assert_eq!(store.tracked_scopes(), 1);
    }

    #[test]
    fn expired_scope_starts_over() {
        let store = InMemoryTokenStore::new();
        let s = scope("s");
        let start = Instant::now();
        let ttl = Duration::from_secs(5);
        assert_eq!(store.take_at(&s, ttl, start), 1);
        assert_eq!(store.take_at(&s, ttl, start + Duration::from_secs(4)), 2);
        assert_eq!(store.take_at(&s, ttl, start + Duration::from_secs(20)), 1);
    }

    #[test]
    fn extend_on_take_pushes_deadline() {
        let store = InMemoryTokenStore::with_policy(TtlPolicy::ExtendOnTake);
        let s = scope("s");
        let start = Instant::now();
        let ttl = Duration::from_secs(5);
        store.take_at(&s, ttl, start);
        store.take_at(&s, ttl, start + Duration::from_secs(4));
        // 8s after start is past the first deadline but inside the extended one.
        assert_eq!(store.take_at(&s, ttl, start + Duration::from_secs(8)), 3);
    }

    #[test]
    fn fixed_at_first_take_keeps_deadline() {
        let store = InMemoryTokenStore::with_policy(TtlPolicy::FixedAtFirstTake);
        let s = scope("s");
        let start = Instant::now();
        let ttl = Duration::from_secs(5);
        store.take_at(&s, ttl, start);
        store.take_at(&s, ttl, start + Duration::from_secs(4));
        assert_eq!(store.take_at(&s, ttl, start + Duration::from_secs(8)), 1);
    }
}
