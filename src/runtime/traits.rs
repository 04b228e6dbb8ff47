//! Embedding seam between the pool and a bytecode engine.
//!
//! The pool never talks to a concrete VM. It compiles bytes through an
//! [`Engine`], instantiates the resulting [`CompiledModule`] against an
//! [`ImportNamespace`](super::ImportNamespace), and then works with the
//! [`GuestInstance`] through its exported memory and functions.

use super::namespace::ImportNamespace;
use super::value::Value;
use crate::error::{Result, SandboxError};
use std::fmt::Debug;
use std::sync::Arc;

/// A guest's flat, growable linear memory.
///
/// Implementations must report the *current* size on every call: guest
/// code may grow (and therefore move) its memory between two host reads.
pub trait LinearMemory {
    /// Current size of the memory in bytes.
    fn size(&self) -> usize;

    /// Copies `buf.len()` bytes starting at `offset` into `buf`.
    ///
    /// # Errors
    ///
    /// Returns an out of bounds error if the range exceeds the current size.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Copies `data` into memory starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an out of bounds error if the range exceeds the current size.
    fn write(&self, offset: usize, data: &[u8]) -> Result<()>;
}

/// Linear memory handle that can be held outside of a call.
pub type SharedMemory = Arc<dyn LinearMemory + Send + Sync>;

type NativeCallback = dyn Fn(&[Value]) -> Result<Vec<Value>> + Send + Sync;

/// A guest-exported function the host can call.
///
/// Calls are synchronous and cannot be preempted; the pool runs them on a
/// blocking worker and races them against the deadline.
#[derive(Clone)]
pub struct NativeFunction {
    name: Arc<str>,
    callback: Arc<NativeCallback>,
}

impl NativeFunction {
    /// Wraps an engine callback.
    pub fn new(
        name: impl Into<Arc<str>>,
        callback: impl Fn(&[Value]) -> Result<Vec<Value>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            callback: Arc::new(callback),
        }
    }

    /// The export name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invokes the guest function on the current thread.
    ///
    /// # Errors
    ///
    /// Returns whatever the guest (or a host function it called) raised.
    pub fn call(&self, args: &[Value]) -> Result<Vec<Value>> {
        (self.callback)(args)
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One instantiated, runnable copy of a guest module.
pub trait GuestInstance: Send + Sync + Debug {
    /// Looks up an exported linear memory.
    ///
    /// # Errors
    ///
    /// Returns a memory not found error if the export is missing.
    fn memory(&self, name: &str) -> Result<SharedMemory>;

    /// Looks up an exported function.
    ///
    /// # Errors
    ///
    /// Returns an export not found (not-implemented class) error if the
    /// guest does not export `name`.
    fn function(&self, name: &str) -> Result<NativeFunction>;

    /// Returns whether the guest exports a function called `name`.
    fn has_function(&self, name: &str) -> bool {
        self.function(name).is_ok()
    }
}

/// Immutable compiled guest bytecode, shared by every pool member.
pub trait CompiledModule: Send + Sync + Debug {
    /// Creates a new instance wired to `imports`.
    ///
    /// # Errors
    ///
    /// Returns an instantiation failed error if an import is missing or
    /// the guest start-up code traps.
    fn instantiate(&self, imports: &ImportNamespace) -> Result<Arc<dyn GuestInstance>>;
}

/// Compiler for guest bytecode.
pub trait Engine: Send + Sync + Debug {
    /// Compiles raw module bytes.
    ///
    /// # Errors
    ///
    /// Returns a compilation failed error if the bytes are not a valid module.
    fn compile(&self, bytes: &[u8]) -> Result<Arc<dyn CompiledModule>>;
}

/// Validates that `offset..offset + len` lies inside a memory of `size` bytes.
///
/// # Errors
///
/// Returns an out of bounds error on overflow or when the range ends past `size`.
pub fn check_range(offset: usize, len: usize, size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(SandboxError::out_of_bounds(
            offset as u64,
            len as u64,
            size as u64,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_range_accepts_exact_fit() {
        assert!(check_range(60, 4, 64).is_ok());
        assert!(check_range(64, 0, 64).is_ok());
    }

    #[test]
    fn check_range_rejects_past_end() {
        let err = check_range(61, 4, 64).unwrap_err();
        assert!(err.is_out_of_bounds());
    }

    #[test]
    fn check_range_rejects_overflow() {
        let err = check_range(usize::MAX, 2, 64).unwrap_err();
        assert!(err.is_out_of_bounds());
    }

    #[test]
    fn native_function_reports_name() {
        let f = NativeFunction::new("handleEvent", |_args| Ok(vec![Value::I32(1)]));
        assert_eq!(f.name(), "handleEvent");
        assert_eq!(f.call(&[]).unwrap(), vec![Value::I32(1)]);
        assert!(format!("{f:?}").contains("handleEvent"));
    }
}
