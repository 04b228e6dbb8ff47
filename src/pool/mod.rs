//! Execution context pool.
//!
//! [`ExecutionContextPool`] owns a fixed number of [`ExecutionContext`]s,
//! each an instantiated guest with its capabilities bound, and lends them
//! out under a FIFO semaphore.

mod config;
mod context;
mod metrics;
#[allow(clippy::module_inception)]
mod pool;

pub use config::{PoolOptions, DEFAULT_CONCURRENCY, DEFAULT_MEMORY_EXPORT, DEFAULT_TIMEOUT};
pub use context::{ContextHandle, ExecutionContext};
pub use metrics::PoolMetrics;
pub use pool::ExecutionContextPool;
