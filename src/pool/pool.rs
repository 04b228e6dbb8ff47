//! Bounded pool of pre-instantiated execution contexts.

use super::config::PoolOptions;
use super::context::{ContextHandle, ExecutionContext};
use super::metrics::{PoolMetrics, PoolStats};
use crate::capability::TraitFactory;
use crate::error::{Result, SandboxError};
use crate::runtime::{CompiledModule, ImportNamespace};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// A fixed set of execution contexts lent out one caller at a time.
///
/// Cloning is cheap and every clone refers to the same pool. Waiters are
/// served in FIFO order.
///
/// # Example
///
/// ```rust,ignore
/// use acton_plugins::prelude::*;
///
/// let pool = ExecutionContextPool::new(options)?;
/// let cancel = CancellationToken::new();
///
/// let result = pool
///     .run_with_context(&cancel, |ectx| {
///         Box::pin(async move { ectx.call("handleEvent", vec![Value::I32(handle)]).await })
///     })
///     .await?;
///
/// pool.close();
/// ```
#[derive(Clone)]
pub struct ExecutionContextPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    id: u64,
    capacity: usize,
    idle: Mutex<VecDeque<ExecutionContext>>,
    permits: Semaphore,
    closed: AtomicBool,
    stats: Arc<PoolStats>,
    runtime: Handle,
    // Contexts are built from it; it must outlive all of them.
    _module: Arc<dyn CompiledModule>,
}

impl ExecutionContextPool {
    /// Compiles the module once and builds `concurrency` contexts.
    ///
    /// Each context is built in order: create every capability against the
    /// context handle and let it register its host functions, instantiate
    /// the module against that namespace, look up the memory export, then
    /// let every capability bind guest exports. Any failure aborts the whole
    /// construction.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a construction-class error.
    pub fn new(options: PoolOptions) -> Result<Self> {
        options.validate()?;

        let runtime = Handle::try_current().map_err(|e| {
            SandboxError::invalid_configuration("runtime", "pool must be created inside a tokio runtime")
                .with_source(e)
        })?;

        let module = options.engine.compile(&options.module)?;
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let stats = Arc::new(PoolStats::default());

        let mut idle = VecDeque::with_capacity(options.concurrency);
        for slot in 0..options.concurrency {
            let context = build_context(id, slot, &options, module.as_ref(), &runtime, &stats)?;
            idle.push_back(context);
        }

        tracing::info!(
            pool_id = id,
            concurrency = options.concurrency,
            timeout_ms = options.timeout.as_millis() as u64,
            capabilities = options.capabilities.len(),
            "Execution context pool ready"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                id,
                capacity: options.concurrency,
                idle: Mutex::new(idle),
                permits: Semaphore::new(options.concurrency),
                closed: AtomicBool::new(false),
                stats,
                runtime,
                _module: module,
            }),
        })
    }

    /// Number of contexts the pool was built with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Snapshot of the pool's accounting.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let available = self.inner.idle.lock().len();
        self.inner.stats.snapshot(self.inner.capacity, available)
    }

    /// Borrows a context, waiting until one is free.
    ///
    /// `cancel` becomes the context's cancellation scope for the borrow.
    ///
    /// # Errors
    ///
    /// Returns a cancellation error if `cancel` fires first and a shutdown
    /// error once the pool is closed.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<ExecutionContext> {
        if self.is_closed() {
            return Err(SandboxError::shutting_down());
        }

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SandboxError::cancelled()),
            permit = self.inner.permits.acquire() => {
                permit.map_err(|_| SandboxError::shutting_down())?
            }
        };
        permit.forget();

        let context = self.take_idle()?;
        context.handle.set_cancellation(cancel.clone());
        self.inner.stats.borrowed_one();
        tracing::trace!(pool_id = self.inner.id, slot = context.slot(), "Context borrowed");
        Ok(context)
    }

    /// Pops an idle context for a caller that already holds a permit.
    ///
    /// `close` may drain the queue between the permit grant and this pop.
    fn take_idle(&self) -> Result<ExecutionContext> {
        let mut idle = self.inner.idle.lock();
        match idle.pop_front() {
            Some(context) => Ok(context),
            None if self.is_closed() => Err(SandboxError::shutting_down()),
            None => Err(SandboxError::internal(
                "permit granted but no idle context was queued",
            )),
        }
    }

    /// Returns a context to the pool.
    ///
    /// If a timed-out or cancelled call is still running on the context, the
    /// context is requeued only after that call has finished.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the context belongs to another pool or
    /// the pool is already full.
    pub fn release(&self, mut context: ExecutionContext) -> Result<()> {
        if context.pool_id != self.inner.id {
            return Err(SandboxError::internal(format!(
                "context from pool {} released into pool {}",
                context.pool_id, self.inner.id
            )));
        }

        context.handle.set_cancellation(CancellationToken::new());

        match context.in_flight.take() {
            None => self.requeue(context),
            Some(task) => {
                let pool = self.clone();
                tracing::debug!(
                    pool_id = self.inner.id,
                    slot = context.slot(),
                    "Deferring requeue until background call settles"
                );
                self.inner.runtime.spawn(async move {
                    let _ = task.await;
                    pool.inner.stats.settling_finished();
                    if let Err(e) = pool.requeue(context) {
                        tracing::error!(error = %e, "Failed to requeue settled context");
                    }
                });
                Ok(())
            }
        }
    }

    fn requeue(&self, context: ExecutionContext) -> Result<()> {
        context.handle.reset();
        let slot = context.slot();

        let mut idle = self.inner.idle.lock();
        if self.inner.closed.load(Ordering::Acquire) {
            drop(idle);
            self.inner.stats.returned_one();
            tracing::debug!(pool_id = self.inner.id, slot, "Pool closed; context disposed");
            return Ok(());
        }
        if idle.len() >= self.inner.capacity {
            return Err(SandboxError::internal(format!(
                "release would overfill the pool beyond {} contexts",
                self.inner.capacity
            )));
        }
        idle.push_back(context);
        drop(idle);

        self.inner.stats.returned_one();
        self.inner.permits.add_permits(1);
        tracing::trace!(pool_id = self.inner.id, slot, "Context returned");
        Ok(())
    }

    /// Borrows a context, runs `f` with it and returns it on every exit
    /// path, including a panic inside `f`.
    ///
    /// # Errors
    ///
    /// Returns the borrow error, `f`'s error, or a fault if `f` panicked.
    pub async fn run_with_context<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut ExecutionContext) -> BoxFuture<'a, Result<T>>,
    {
        let mut context = self.acquire(cancel).await?;

        let outcome = AssertUnwindSafe(async { f(&mut context).await })
            .catch_unwind()
            .await;

        let released = self.release(context);

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                self.inner.stats.record_fault();
                let message = panic_message(panic.as_ref());
                tracing::error!(panic = %message, "Callback panicked while holding a context");
                Err(SandboxError::fault(message))
            }
        };

        released?;
        result
    }

    /// Closes the pool.
    ///
    /// Idle contexts are disposed immediately; contexts still borrowed are
    /// disposed when released. Waiting and future acquirers get a shutdown
    /// error. Calling `close` twice is harmless.
    pub fn close(&self) {
        let disposed: Vec<ExecutionContext> = {
            let mut idle = self.inner.idle.lock();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            self.inner.permits.close();
            idle.drain(..).collect()
        };

        tracing::info!(
            pool_id = self.inner.id,
            disposed = disposed.len(),
            still_borrowed = self.inner.capacity - disposed.len(),
            "Execution context pool closed"
        );
    }
}

impl fmt::Debug for ExecutionContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContextPool")
            .field("id", &self.inner.id)
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn build_context(
    pool_id: u64,
    slot: usize,
    options: &PoolOptions,
    module: &dyn CompiledModule,
    runtime: &Handle,
    stats: &Arc<PoolStats>,
) -> Result<ExecutionContext> {
    let handle = ContextHandle::new(slot, runtime.clone());
    let mut imports = ImportNamespace::new();
    let mut traits = Vec::with_capacity(options.capabilities.len());

    for capability in &options.capabilities {
        let host_trait = capability.create_trait(&handle)?;
        host_trait.export_to_guest(&mut imports)?;
        traits.push(host_trait);
    }

    let instance = module.instantiate(&imports)?;
    let memory = instance.memory(&options.memory_export)?;
    handle.set_memory(memory);

    for (capability, host_trait) in options.capabilities.iter().zip(traits.iter_mut()) {
        host_trait.import_from_guest(instance.as_ref()).map_err(|e| {
            if e.class() == crate::error::ErrorClass::NotImplemented {
                SandboxError::trait_registration_failed(capability.group(), e.to_string())
                    .with_source(e)
            } else {
                e
            }
        })?;
    }

    tracing::debug!(
        pool_id,
        slot,
        functions = imports.len(),
        "Execution context built"
    );

    Ok(ExecutionContext::new(
        pool_id,
        handle,
        instance,
        traits,
        options.timeout,
        stats.clone(),
    ))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{StubEngine, StubModule};

    fn pool(concurrency: usize) -> ExecutionContextPool {
        let engine = Arc::new(StubEngine::new());
        let bytes = engine.register(StubModule::new("idle"));
        ExecutionContextPool::new(PoolOptions::new(engine, bytes).with_concurrency(concurrency))
            .unwrap()
    }

    #[tokio::test]
    async fn take_idle_pops_queued_context() {
        let pool = pool(1);
        assert!(pool.take_idle().is_ok());
    }

    #[tokio::test]
    async fn take_idle_after_close_is_shutdown() {
        let pool = pool(1);
        pool.close();
        let err = pool.take_idle().unwrap_err();
        assert!(err.is_shutting_down());
    }
}
