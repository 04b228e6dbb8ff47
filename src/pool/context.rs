//! A single pooled sandbox instance and the handle its capabilities share.

use super::metrics::PoolStats;
use crate::capability::HostTrait;
use crate::error::{Result, SandboxError};
use crate::interop::{Buffer, HandleTable};
use crate::runtime::{GuestInstance, NativeFunction, SharedMemory, Value};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

/// The part of an execution context its capabilities hold on to.
///
/// Host functions run on a blocking worker while the guest calls them;
/// through this handle they reach the context's handle table, its current
/// cancellation scope and the async runtime.
#[derive(Clone)]
pub struct ContextHandle {
    shared: Arc<ContextShared>,
}

struct ContextShared {
    slot: usize,
    memory: OnceLock<SharedMemory>,
    cancel: Mutex<CancellationToken>,
    handles: Mutex<HandleTable>,
    runtime: Handle,
}

impl ContextHandle {
    pub(crate) fn new(slot: usize, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(ContextShared {
                slot,
                memory: OnceLock::new(),
                cancel: Mutex::new(CancellationToken::new()),
                handles: Mutex::new(HandleTable::new()),
                runtime,
            }),
        }
    }

    /// Pool slot this context occupies.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.shared.slot
    }

    /// The instance's linear memory, for use outside of a guest call.
    ///
    /// Host functions should prefer the memory passed in their
    /// [`HostCall`](crate::runtime::HostCall).
    ///
    /// # Errors
    ///
    /// Fails while the context is still being built.
    pub fn memory(&self) -> Result<SharedMemory> {
        self.shared
            .memory
            .get()
            .cloned()
            .ok_or_else(|| SandboxError::internal("context memory requested before instantiation"))
    }

    pub(crate) fn set_memory(&self, memory: SharedMemory) {
        let _ = self.shared.memory.set(memory);
    }

    /// The cancellation scope of the caller currently holding the context.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.shared.cancel.lock().clone()
    }

    pub(crate) fn set_cancellation(&self, token: CancellationToken) {
        *self.shared.cancel.lock() = token;
    }

    /// Stores `bytes` and returns a handle valid for the current borrow.
    ///
    /// # Errors
    ///
    /// Fails when the handle table is full.
    pub fn register_buffer(&self, bytes: Bytes, message_type: Option<&'static str>) -> Result<i32> {
        self.shared.handles.lock().insert(Buffer {
            bytes,
            message_type,
        })
    }

    /// Returns the buffer behind `handle` without consuming it.
    ///
    /// # Errors
    ///
    /// Returns a stale handle error for unknown handles.
    pub fn resolve_buffer(&self, handle: i32) -> Result<Buffer> {
        self.shared.handles.lock().resolve(handle).cloned()
    }

    /// Drops the buffer behind `handle`.
    pub fn discard_buffer(&self, handle: i32) -> bool {
        self.shared.handles.lock().discard(handle)
    }

    /// Number of live handles.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.shared.handles.lock().len()
    }

    /// Invalidates every handle and detaches the caller's scope.
    pub(crate) fn reset(&self) {
        self.shared.handles.lock().reset();
        self.set_cancellation(CancellationToken::new());
    }

    /// Drives `future` to completion from a blocking worker, giving up if
    /// the current caller cancels.
    ///
    /// Must not be called from inside an async task.
    ///
    /// # Errors
    ///
    /// Returns a cancellation error if the caller's scope fires first.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        let cancel = self.cancellation();
        self.shared.runtime.block_on(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(SandboxError::cancelled()),
                output = future => Ok(output),
            }
        })
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("slot", &self.shared.slot)
            .field("instantiated", &self.shared.memory.get().is_some())
            .finish_non_exhaustive()
    }
}

enum Outcome {
    Finished(std::result::Result<Result<Vec<Value>>, JoinError>),
    Cancelled,
    TimedOut,
}

/// One instantiated sandbox, lent to a single caller at a time.
pub struct ExecutionContext {
    pub(crate) pool_id: u64,
    pub(crate) handle: ContextHandle,
    instance: Arc<dyn GuestInstance>,
    traits: Vec<Box<dyn HostTrait>>,
    timeout: Duration,
    pub(crate) in_flight: Option<JoinHandle<Result<Vec<Value>>>>,
    stats: Arc<PoolStats>,
}

impl ExecutionContext {
    pub(crate) fn new(
        pool_id: u64,
        handle: ContextHandle,
        instance: Arc<dyn GuestInstance>,
        traits: Vec<Box<dyn HostTrait>>,
        timeout: Duration,
        stats: Arc<PoolStats>,
    ) -> Self {
        Self {
            pool_id,
            handle,
            instance,
            traits,
            timeout,
            in_flight: None,
            stats,
        }
    }

    /// The handle shared with this context's capabilities.
    #[must_use]
    pub fn handle(&self) -> &ContextHandle {
        &self.handle
    }

    /// Pool slot this context occupies.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.handle.slot()
    }

    /// Per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of capabilities bound to this context.
    #[must_use]
    pub fn capability_count(&self) -> usize {
        self.traits.len()
    }

    /// Returns true while a timed-out or cancelled call is still running.
    #[must_use]
    pub fn has_call_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Resolves a guest export.
    ///
    /// # Errors
    ///
    /// Returns a not-implemented error if the guest does not export `name`.
    pub fn function(&self, name: &str) -> Result<NativeFunction> {
        self.instance.function(name)
    }

    /// Returns true if the guest exports `name`.
    #[must_use]
    pub fn has_function(&self, name: &str) -> bool {
        self.instance.has_function(name)
    }

    /// Resolves and executes `name`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        let function = self.function(name)?;
        self.execute(&function, args).await
    }

    /// Runs `function` on a blocking worker, racing it against the timeout
    /// and the caller's cancellation.
    ///
    /// The guest call cannot be interrupted. When the race is lost the
    /// worker keeps running and the context remembers it. A later `execute`
    /// waits for it first, within its own timeout, and the pool only
    /// requeues the context once it has finished.
    ///
    /// # Errors
    ///
    /// Returns a timeout error, a cancellation error, a fault if the call
    /// panicked, or the error the guest raised.
    pub async fn execute(
        &mut self,
        function: &NativeFunction,
        args: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        self.settle(function.name(), deadline.as_mut()).await?;

        let cancel = self.handle.cancellation();
        if cancel.is_cancelled() {
            return Err(SandboxError::cancelled());
        }

        let native = function.clone();
        let mut task = tokio::task::spawn_blocking(move || native.call(&args));

        let outcome = tokio::select! {
            biased;
            joined = &mut task => Outcome::Finished(joined),
            () = cancel.cancelled() => Outcome::Cancelled,
            () = &mut deadline => Outcome::TimedOut,
        };

        match outcome {
            Outcome::Finished(Ok(result)) => {
                self.stats.record_completed();
                result
            }
            Outcome::Finished(Err(join_error)) => {
                self.stats.record_fault();
                Err(fault_from_join(function.name(), &join_error))
            }
            Outcome::Cancelled => {
                tracing::debug!(slot = self.slot(), function = function.name(), "Guest call cancelled");
                self.stats.record_cancellation();
                self.detach(task);
                Err(SandboxError::cancelled())
            }
            Outcome::TimedOut => {
                tracing::warn!(
                    slot = self.slot(),
                    function = function.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Guest call timed out"
                );
                self.stats.record_timeout();
                self.detach(task);
                Err(SandboxError::timeout(function.name(), self.timeout))
            }
        }
    }

    fn detach(&mut self, task: JoinHandle<Result<Vec<Value>>>) {
        self.stats.settling_started();
        self.in_flight = Some(task);
    }

    /// Waits for a previously abandoned call to finish, bounded by the
    /// deadline of the call about to start. The abandoned call stays
    /// recorded when the wait is cut short.
    async fn settle(&mut self, function: &str, deadline: Pin<&mut Sleep>) -> Result<()> {
        let Some(task) = self.in_flight.as_mut() else {
            return Ok(());
        };
        let cancel = self.handle.cancellation();

        tokio::select! {
            biased;
            _ = task => {}
            () = cancel.cancelled() => {
                self.stats.record_cancellation();
                return Err(SandboxError::cancelled());
            }
            () = deadline => {
                tracing::warn!(
                    slot = self.handle.slot(),
                    function,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Previous guest call still running at deadline"
                );
                self.stats.record_timeout();
                return Err(SandboxError::timeout(function, self.timeout));
            }
        }

        self.in_flight = None;
        self.stats.settling_finished();
        tracing::debug!(slot = self.slot(), "Background guest call settled");
        Ok(())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("slot", &self.slot())
            .field("instance", &self.instance)
            .field("traits", &self.traits)
            .field("timeout", &self.timeout)
            .field("in_flight", &self.in_flight.is_some())
            .finish_non_exhaustive()
    }
}

pub(crate) fn fault_from_join(function: &str, error: &JoinError) -> SandboxError {
    if error.is_panic() {
        SandboxError::fault(format!("guest function '{function}' panicked"))
    } else {
        SandboxError::fault(format!("guest function '{function}' was aborted: {error}"))
    }
}
