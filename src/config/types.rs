//! Configuration types for the plugin host.

use crate::error::{Result, SandboxError};
use crate::interop::StringDecoder;
use crate::logging::LoggingConfig;
use crate::pool::{DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT};
use crate::tokens::{InMemoryTokenStore, LibsqlTokenStore, PersistentStore, TtlPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default cap on guest linear memory (64 MiB).
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Default libSQL database file.
pub const DEFAULT_STORE_PATH: &str = "plugin-host-tokens.db";

/// Root configuration structure for the plugin host.
///
/// This structure maps directly to the TOML configuration file format:
///
/// ```toml
/// string_encoding = "assemblyscript"
///
/// [pool]
/// module = "build/plugin.wasm"
/// concurrency = 8
/// timeout_secs = 10
///
/// [token_store]
/// backend = "libsql"
/// path = "tokens.db"
/// ttl_policy = "fixed_at_first_take"
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Pool sizing and the guest module.
    pub pool: PoolSection,
    /// Where token scopes are persisted.
    pub token_store: TokenStoreSection,
    /// Console logging.
    pub logging: LoggingConfig,
    /// Layout of strings the guest passes to host functions.
    pub string_encoding: StringDecoder,
}

impl HostConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the guest module path.
    #[must_use]
    pub fn with_module(mut self, path: impl Into<PathBuf>) -> Self {
        self.pool.module = Some(path.into());
        self
    }

    /// Sets the number of pooled contexts.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.pool.concurrency = concurrency;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an invalid configuration error naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.pool.concurrency == 0 {
            return Err(SandboxError::invalid_configuration(
                "pool.concurrency",
                "must be at least 1",
            ));
        }
        if self.pool.timeout_secs == 0 {
            return Err(SandboxError::invalid_configuration(
                "pool.timeout_secs",
                "must be at least 1",
            ));
        }
        if self.pool.memory_limit == 0 {
            return Err(SandboxError::invalid_configuration(
                "pool.memory_limit",
                "must be greater than zero",
            ));
        }
        if self.token_store.backend == StoreBackend::Libsql
            && self.token_store.path.trim().is_empty()
        {
            return Err(SandboxError::invalid_configuration(
                "token_store.path",
                "required for the libsql backend",
            ));
        }
        Ok(())
    }
}

/// `[pool]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Path to the guest module.
    pub module: Option<PathBuf>,
    /// Number of pooled contexts.
    ///
    /// Default: 4
    pub concurrency: usize,
    /// Per-call timeout in seconds.
    ///
    /// Default: 30
    pub timeout_secs: u64,
    /// Maximum guest memory in bytes.
    ///
    /// Default: 64 MiB
    pub memory_limit: usize,
}

impl PoolSection {
    /// The per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            module: None,
            concurrency: DEFAULT_CONCURRENCY,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

/// Token store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process memory; counts are lost on exit.
    Memory,
    /// A libSQL database file.
    #[default]
    Libsql,
}

/// `[token_store]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenStoreSection {
    /// Which backend to use.
    pub backend: StoreBackend,
    /// Database file for the libsql backend. `":memory:"` is allowed.
    pub path: String,
    /// When a scope's deadline moves.
    pub ttl_policy: TtlPolicy,
}

impl Default for TokenStoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: DEFAULT_STORE_PATH.to_string(),
            ttl_policy: TtlPolicy::default(),
        }
    }
}

impl TokenStoreSection {
    /// Opens the configured store.
    ///
    /// # Errors
    ///
    /// Returns a store error if the database cannot be opened.
    pub async fn open(&self) -> Result<Arc<dyn PersistentStore>> {
        let store: Arc<dyn PersistentStore> = match self.backend {
            StoreBackend::Memory => Arc::new(InMemoryTokenStore::with_policy(self.ttl_policy)),
            StoreBackend::Libsql => {
                Arc::new(LibsqlTokenStore::open(&self.path, self.ttl_policy).await?)
            }
        };
        tracing::info!(backend = ?self.backend, policy = ?self.ttl_policy, "Token store ready");
        Ok(store)
    }
}
