//! # Acton-Plugins: pooled sandbox runtime for plugin modules
//!
//! Runs untrusted guest modules inside a fixed pool of pre-instantiated
//! sandboxes. Each sandbox gets a set of host capabilities, and every call
//! is bounded by a timeout and the caller's cancellation scope.
//!
//! ## Architecture
//!
//! - **Runtime**: the engine seam (compile, instantiate, memory, exports)
//!   with an in-process stub engine and an optional wasmtime backend
//! - **Pool**: FIFO-fair lending of execution contexts, timeout and
//!   cancellation handling, deferred requeue of abandoned calls
//! - **Capability**: two-phase host traits (`env`, `store`, `interop`,
//!   `api`, plugin handlers) bound to every context
//! - **Interop**: per-borrow handle table and typed protobuf messages
//! - **Tokens**: TTL-scoped counters persisted in libSQL or memory
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use acton_plugins::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = Arc::new(StubEngine::new());
//!     let module = engine.register(StubModule::new("hello").with_export("run", |_env, _args| {
//!         Ok(vec![Value::I32(42)])
//!     }));
//!
//!     let pool = ExecutionContextPool::new(
//!         PoolOptions::new(engine, module).with_capability(Capability::Interop),
//!     )?;
//!
//!     let answer = pool
//!         .run_with_context(&CancellationToken::new(), |ctx| {
//!             Box::pin(async move { ctx.call("run", vec![]).await })
//!         })
//!         .await?;
//!
//!     pool.close();
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod capability;
pub mod config;
pub mod error;
pub mod interop;
pub mod logging;
pub mod pool;
pub mod runtime;
pub mod tokens;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::api::{DryRunLockClient, Lock, LockClient};
    pub use crate::capability::{
        handle_event, rewrite_headers, Capability, HostTrait, TraitFactory,
    };
    pub use crate::config::HostConfig;
    pub use crate::error::{ErrorClass, Result, SandboxError};
    pub use crate::interop::{receive_message, send_message, InteropMessage, StringDecoder};
    pub use crate::pool::{ContextHandle, ExecutionContext, ExecutionContextPool, PoolOptions};
    pub use crate::runtime::{
        Engine, GuestEnv, HostFunction, ImportNamespace, StubEngine, StubModule, Value,
    };
    pub use crate::tokens::{InMemoryTokenStore, LibsqlTokenStore, PersistentStore, TtlPolicy};

    pub use tokio_util::sync::CancellationToken;
}
