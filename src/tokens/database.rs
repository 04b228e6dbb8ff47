//! Token store persisted in libSQL.

use super::{PersistentStore, ScopeKey, StoreError, TtlPolicy};
use async_trait::async_trait;
use libsql::{Connection, Database};
use std::time::Duration;
use tokio::sync::Mutex;

const CREATE_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS token_scopes (
    scope TEXT PRIMARY KEY,
    count INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
";

// ?3 selects the policy: 1 moves the deadline on every take.
const UPSERT_SCOPE: &str = "
INSERT INTO token_scopes (scope, count, expires_at) VALUES (?1, 1, ?2)
ON CONFLICT(scope) DO UPDATE SET
    count = token_scopes.count + 1,
    expires_at = CASE WHEN ?3 = 1 THEN excluded.expires_at ELSE token_scopes.expires_at END
RETURNING count
";

/// A [`PersistentStore`] backed by a libSQL database file.
///
/// Expiry is stored as a Unix timestamp in milliseconds and checked on
/// every take, so expired rows are treated as absent.
pub struct LibsqlTokenStore {
    _db: Database,
    conn: Mutex<Connection>,
    policy: TtlPolicy,
}

impl LibsqlTokenStore {
    /// Opens (or creates) the database at `path`. `":memory:"` gives a
    /// throwaway database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be created.
    pub async fn open(path: &str, policy: TtlPolicy) -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::database_open(path, e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::database_open(path, e.to_string()))?;

        conn.execute_batch(CREATE_SCHEMA)
            .await
            .map_err(|e| StoreError::schema_init(e.to_string()))?;

        tracing::debug!(path, ?policy, "Token store opened");

        Ok(Self {
            _db: db,
            conn: Mutex::new(conn),
            policy,
        })
    }

    /// The TTL policy in effect.
    #[must_use]
    pub fn policy(&self) -> TtlPolicy {
        self.policy
    }

    async fn take_at(&self, scope: &ScopeKey, ttl: Duration, now_ms: i64) -> Result<i32, StoreError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_ms.saturating_add(ttl_ms);
        let extend = i64::from(self.policy == TtlPolicy::ExtendOnTake);

        let conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| StoreError::query_failed("take_token", e.to_string()))?;

        tx.execute(
            "DELETE FROM token_scopes WHERE scope = ?1 AND expires_at <= ?2",
            libsql::params![scope.as_str(), now_ms],
        )
        .await
        .map_err(|e| StoreError::query_failed("take_token", e.to_string()))?;

        let mut rows = tx
            .query(
                UPSERT_SCOPE,
                libsql::params![scope.as_str(), expires_at, extend],
            )
            .await
            .map_err(|e| StoreError::query_failed("take_token", e.to_string()))?;

        let count: i64 = match rows
            .next()
            .await
            .map_err(|e| StoreError::query_failed("take_token", e.to_string()))?
        {
            Some(row) => row
                .get(0)
                .map_err(|e| StoreError::query_failed("take_token", e.to_string()))?,
            None => {
                return Err(StoreError::query_failed(
                    "take_token",
                    "upsert returned no row",
                ))
            }
        };
        drop(rows);

        tx.commit()
            .await
            .map_err(|e| StoreError::query_failed("take_token", e.to_string()))?;

        Ok(i32::try_from(count).unwrap_or(i32::MAX))
    }
}

impl std::fmt::Debug for LibsqlTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibsqlTokenStore")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PersistentStore for LibsqlTokenStore {
    async fn take_token(&self, scope: &ScopeKey, ttl: Duration) -> Result<i32, StoreError> {
        let count = self
            .take_at(scope, ttl, chrono::Utc::now().timestamp_millis())
            .await?;
        tracing::trace!(%scope, count, "Token taken");
        Ok(count)
    }

    async fn release_tokens(&self, scope: &ScopeKey) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM token_scopes WHERE scope = ?1",
            [scope.as_str()],
        )
        .await
        .map_err(|e| StoreError::query_failed("release_tokens", e.to_string()))?;
        tracing::trace!(%scope, "Tokens released");
        Ok(())
    }
}
