//! Client side of the domain API.

use super::{ApiError, Lock};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Debug;

/// The subset of the domain API exposed to guests.
#[async_trait]
pub trait LockClient: Send + Sync + Debug {
    /// Creates or replaces `lock`.
    ///
    /// # Errors
    ///
    /// Returns an API error if the server rejects the lock or cannot be
    /// reached.
    async fn upsert_lock(&self, lock: &Lock) -> Result<(), ApiError>;
}

/// A [`LockClient`] that logs upserts and keeps them in memory instead of
/// contacting a server.
#[derive(Debug, Default)]
pub struct DryRunLockClient {
    upserts: Mutex<Vec<Lock>>,
}

impl DryRunLockClient {
    /// Creates a client with no recorded upserts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks upserted so far, oldest first.
    #[must_use]
    pub fn upserts(&self) -> Vec<Lock> {
        self.upserts.lock().clone()
    }
}

#[async_trait]
impl LockClient for DryRunLockClient {
    async fn upsert_lock(&self, lock: &Lock) -> Result<(), ApiError> {
        let target = lock.spec.as_ref().and_then(|spec| spec.target.as_ref());
        tracing::info!(
            name = lock.name(),
            namespace = lock.metadata.as_ref().map_or("", |m| m.namespace.as_str()),
            user = target.map_or("", |t| t.user.as_str()),
            role = target.map_or("", |t| t.role.as_str()),
            "Dry run: lock upserted"
        );
        self.upserts.lock().push(lock.clone());
        Ok(())
    }
}
