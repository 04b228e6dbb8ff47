//! Pool construction options.

use crate::capability::Capability;
use crate::error::{Result, SandboxError};
use crate::runtime::Engine;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default number of pooled contexts.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default per-call timeout (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default name of the guest memory export.
pub const DEFAULT_MEMORY_EXPORT: &str = "memory";

/// Options for [`ExecutionContextPool::new`](super::ExecutionContextPool::new).
///
/// # Example
///
/// ```rust,ignore
/// use acton_plugins::prelude::*;
/// use std::time::Duration;
///
/// let options = PoolOptions::new(engine, module_bytes)
///     .with_concurrency(8)
///     .with_timeout(Duration::from_secs(5))
///     .with_capability(Capability::env())
///     .with_capability(Capability::Interop);
/// ```
#[derive(Clone)]
pub struct PoolOptions {
    /// Engine that compiles and instantiates the module.
    pub engine: Arc<dyn Engine>,
    /// Raw guest module bytes.
    pub module: Arc<[u8]>,
    /// Number of contexts, and so the number of concurrent calls.
    ///
    /// Default: 4
    pub concurrency: usize,
    /// Per-call timeout.
    ///
    /// Default: 30 seconds
    pub timeout: Duration,
    /// Capabilities bound to every context, in registration order.
    pub capabilities: Vec<Capability>,
    /// Name of the guest memory export.
    pub memory_export: String,
}

impl PoolOptions {
    /// Creates options with default concurrency and timeout and no
    /// capabilities.
    pub fn new(engine: Arc<dyn Engine>, module: impl Into<Arc<[u8]>>) -> Self {
        Self {
            engine,
            module: module.into(),
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            capabilities: Vec::new(),
            memory_export: DEFAULT_MEMORY_EXPORT.to_string(),
        }
    }

    /// Sets the number of contexts.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a capability.
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Adds several capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    /// Sets the memory export name.
    #[must_use]
    pub fn with_memory_export(mut self, name: impl Into<String>) -> Self {
        self.memory_export = name.into();
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns an invalid configuration error for zero concurrency, a zero
    /// timeout, or an empty module.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(SandboxError::invalid_configuration(
                "concurrency",
                "must be greater than zero",
            ));
        }

        if self.timeout.is_zero() {
            return Err(SandboxError::invalid_configuration(
                "timeout",
                "must be greater than zero",
            ));
        }

        if self.module.is_empty() {
            return Err(SandboxError::invalid_configuration(
                "module",
                "module bytes are empty",
            ));
        }

        if self.memory_export.is_empty() {
            return Err(SandboxError::invalid_configuration(
                "memory_export",
                "must not be empty",
            ));
        }

        Ok(())
    }
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("engine", &self.engine)
            .field("module_len", &self.module.len())
            .field("concurrency", &self.concurrency)
            .field("timeout", &self.timeout)
            .field("capabilities", &self.capabilities)
            .field("memory_export", &self.memory_export)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::StubEngine;

    fn options() -> PoolOptions {
        PoolOptions::new(Arc::new(StubEngine::new()), b"guest".to_vec())
    }

    #[test]
    fn defaults() {
        let options = options();
        assert_eq!(options.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
        assert_eq!(options.memory_export, "memory");
        assert!(options.capabilities.is_empty());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn builder_sets_fields() {
        let options = options()
            .with_concurrency(2)
            .with_timeout(Duration::from_millis(50))
            .with_capability(Capability::Interop);
        assert_eq!(options.concurrency, 2);
        assert_eq!(options.timeout, Duration::from_millis(50));
        assert_eq!(options.capabilities.len(), 1);
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let err = options().with_concurrency(0).validate().unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let err = options().with_timeout(Duration::ZERO).validate().unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn empty_module_is_invalid() {
        let err = PoolOptions::new(Arc::new(StubEngine::new()), Vec::new())
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("module"));
    }
}
