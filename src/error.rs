//! Error types for the plugin runtime.
//!
//! Every fallible operation in the crate reports a [`SandboxError`]. The
//! specific failure lives in [`SandboxErrorKind`]; [`ErrorClass`] groups kinds
//! into the categories callers base retry decisions on (timeout and
//! cancellation may be retried with a fresh context, application failures
//! should not be).
//!
//! No external error crates (anyhow, thiserror, eyre) are used.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Coarse category of a [`SandboxError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Pool or context construction failed; fatal to pool startup.
    Construction,
    /// Borrowing a context failed (pool closed).
    Borrow,
    /// Application-level failure raised by guest or host code.
    Call,
    /// The per-call deadline elapsed.
    Timeout,
    /// The caller's cancellation scope fired.
    Cancellation,
    /// A value passed across the boundary was rejected.
    InvalidArgument,
    /// A guest memory access fell outside the current memory.
    Bounds,
    /// An expected guest export is missing.
    NotImplemented,
    /// A panic or an internal accounting violation.
    Fault,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Construction => "construction",
            Self::Borrow => "borrow",
            Self::Call => "call",
            Self::Timeout => "timeout",
            Self::Cancellation => "cancellation",
            Self::InvalidArgument => "invalid-argument",
            Self::Bounds => "bounds",
            Self::NotImplemented => "not-implemented",
            Self::Fault => "fault",
        };
        f.write_str(name)
    }
}

/// Specific runtime error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxErrorKind {
    /// The guest module bytes could not be compiled.
    CompilationFailed {
        /// Reason reported by the engine
        reason: String,
    },
    /// The compiled module could not be instantiated against the imports.
    InstantiationFailed {
        /// Reason reported by the engine
        reason: String,
    },
    /// The instance does not export the expected linear memory.
    MemoryNotFound {
        /// Name of the missing memory export
        name: String,
    },
    /// A trait failed to register or bind its functions.
    TraitRegistrationFailed {
        /// Function group owned by the trait
        group: String,
        /// Why registration failed
        reason: String,
    },
    /// Two traits registered the same function.
    DuplicateFunction {
        /// Function group
        group: String,
        /// Function name
        name: String,
    },
    /// Invalid configuration provided.
    InvalidConfiguration {
        /// The configuration field that is invalid
        field: String,
        /// Why it's invalid
        reason: String,
    },
    /// The pool has been closed.
    ShuttingDown,
    /// A guest or host function failed.
    CallFailed {
        /// Name of the function that failed
        function: String,
        /// Detailed reason for the failure
        reason: String,
    },
    /// A structured message could not be decoded.
    DecodeFailed {
        /// Message type that was expected
        message_type: String,
        /// Decoder error
        reason: String,
    },
    /// A decoded object failed its structural validation.
    ValidationFailed {
        /// What was invalid
        reason: String,
    },
    /// The per-call timeout elapsed before the call finished.
    ExecutionTimeout {
        /// Name of the guest function
        function: String,
        /// The timeout that was exceeded
        duration: Duration,
    },
    /// The caller's cancellation scope fired.
    Cancelled,
    /// An argument was rejected.
    InvalidArgument {
        /// Name of the argument
        argument: String,
        /// Why it was rejected
        reason: String,
    },
    /// A handle does not belong to the current call.
    StaleHandle {
        /// The raw handle value
        handle: i32,
    },
    /// A guest memory access was out of range.
    OutOfBounds {
        /// Start offset of the access
        offset: u64,
        /// Length of the access
        length: u64,
        /// Memory size at the time of the access
        memory_size: u64,
    },
    /// The guest does not export a required function.
    ExportNotFound {
        /// Name of the missing export
        name: String,
    },
    /// A call or callback panicked.
    Fault {
        /// Panic payload or join error
        reason: String,
    },
    /// Internal bookkeeping was violated.
    Internal {
        /// Description of the violation
        message: String,
    },
}

impl SandboxErrorKind {
    /// Returns the category this kind belongs to.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::CompilationFailed { .. }
            | Self::InstantiationFailed { .. }
            | Self::MemoryNotFound { .. }
            | Self::TraitRegistrationFailed { .. }
            | Self::DuplicateFunction { .. }
            | Self::InvalidConfiguration { .. } => ErrorClass::Construction,
            Self::ShuttingDown => ErrorClass::Borrow,
            Self::CallFailed { .. } | Self::DecodeFailed { .. } | Self::ValidationFailed { .. } => {
                ErrorClass::Call
            }
            Self::ExecutionTimeout { .. } => ErrorClass::Timeout,
            Self::Cancelled => ErrorClass::Cancellation,
            Self::InvalidArgument { .. } | Self::StaleHandle { .. } => ErrorClass::InvalidArgument,
            Self::OutOfBounds { .. } => ErrorClass::Bounds,
            Self::ExportNotFound { .. } => ErrorClass::NotImplemented,
            Self::Fault { .. } | Self::Internal { .. } => ErrorClass::Fault,
        }
    }
}

/// Errors produced by the plugin runtime.
///
/// The kind is boxed to keep `Result<T, SandboxError>` small. An optional
/// source error preserves the cause chain for diagnostics.
#[derive(Clone)]
pub struct SandboxError {
    kind: Box<SandboxErrorKind>,
    source: Option<Arc<dyn Error + Send + Sync + 'static>>,
}

impl SandboxError {
    /// Creates a new SandboxError with the given kind.
    #[must_use]
    pub fn new(kind: SandboxErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            source: None,
        }
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &SandboxErrorKind {
        &self.kind
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    /// Creates a compilation failed error.
    #[must_use]
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::CompilationFailed {
            reason: reason.into(),
        })
    }

    /// Creates an instantiation failed error.
    #[must_use]
    pub fn instantiation_failed(reason: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::InstantiationFailed {
            reason: reason.into(),
        })
    }

    /// Creates a memory not found error.
    #[must_use]
    pub fn memory_not_found(name: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::MemoryNotFound { name: name.into() })
    }

    /// Creates a trait registration error.
    #[must_use]
    pub fn trait_registration_failed(group: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::TraitRegistrationFailed {
            group: group.into(),
            reason: reason.into(),
        })
    }

    /// Creates a duplicate function error.
    #[must_use]
    pub fn duplicate_function(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::DuplicateFunction {
            group: group.into(),
            name: name.into(),
        })
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Creates a shutting down error.
    #[must_use]
    pub fn shutting_down() -> Self {
        Self::new(SandboxErrorKind::ShuttingDown)
    }

    /// Creates a call failed error.
    #[must_use]
    pub fn call_failed(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::CallFailed {
            function: function.into(),
            reason: reason.into(),
        })
    }

    /// Creates a decode failed error.
    #[must_use]
    pub fn decode_failed(message_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::DecodeFailed {
            message_type: message_type.into(),
            reason: reason.into(),
        })
    }

    /// Creates a validation failed error.
    #[must_use]
    pub fn validation_failed(reason: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::ValidationFailed {
            reason: reason.into(),
        })
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(function: impl Into<String>, duration: Duration) -> Self {
        Self::new(SandboxErrorKind::ExecutionTimeout {
            function: function.into(),
            duration,
        })
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(SandboxErrorKind::Cancelled)
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(argument: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::InvalidArgument {
            argument: argument.into(),
            reason: reason.into(),
        })
    }

    /// Creates a stale handle error.
    #[must_use]
    pub fn stale_handle(handle: i32) -> Self {
        Self::new(SandboxErrorKind::StaleHandle { handle })
    }

    /// Creates an out of bounds error.
    #[must_use]
    pub fn out_of_bounds(offset: u64, length: u64, memory_size: u64) -> Self {
        Self::new(SandboxErrorKind::OutOfBounds {
            offset,
            length,
            memory_size,
        })
    }

    /// Creates an export not found error.
    #[must_use]
    pub fn export_not_found(name: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::ExportNotFound { name: name.into() })
    }

    /// Creates a fault error.
    #[must_use]
    pub fn fault(reason: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::Fault {
            reason: reason.into(),
        })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::Internal {
            message: message.into(),
        })
    }

    /// Returns true if the call may be retried with a fresh context.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Timeout | ErrorClass::Cancellation
        )
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.class() == ErrorClass::Timeout
    }

    /// Returns true if this error is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.class() == ErrorClass::Cancellation
    }

    /// Returns true if this error is an invalid argument.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        self.class() == ErrorClass::InvalidArgument
    }

    /// Returns true if this error is an out of bounds memory access.
    #[must_use]
    pub fn is_out_of_bounds(&self) -> bool {
        self.class() == ErrorClass::Bounds
    }

    /// Returns true if the pool has been closed.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        matches!(*self.kind, SandboxErrorKind::ShuttingDown)
    }
}

impl fmt::Debug for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxError")
            .field("kind", &self.kind)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl PartialEq for SandboxError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_ref() {
            SandboxErrorKind::CompilationFailed { reason } => {
                write!(f, "failed to compile guest module: {reason}")
            }
            SandboxErrorKind::InstantiationFailed { reason } => {
                write!(
                    f,
                    "failed to instantiate guest module: {reason}; check that every import is provided by a configured capability"
                )
            }
            SandboxErrorKind::MemoryNotFound { name } => {
                write!(f, "guest module does not export memory '{name}'")
            }
            SandboxErrorKind::TraitRegistrationFailed { group, reason } => {
                write!(f, "capability '{group}' failed to register: {reason}")
            }
            SandboxErrorKind::DuplicateFunction { group, name } => {
                write!(
                    f,
                    "function '{group}.{name}' is registered by more than one capability"
                )
            }
            SandboxErrorKind::InvalidConfiguration { field, reason } => {
                write!(f, "invalid configuration for '{field}': {reason}")
            }
            SandboxErrorKind::ShuttingDown => {
                write!(f, "execution context pool is closed; cannot accept new calls")
            }
            SandboxErrorKind::CallFailed { function, reason } => {
                write!(f, "function '{function}' failed: {reason}")
            }
            SandboxErrorKind::DecodeFailed {
                message_type,
                reason,
            } => {
                write!(f, "failed to decode {message_type}: {reason}")
            }
            SandboxErrorKind::ValidationFailed { reason } => {
                write!(f, "validation failed: {reason}")
            }
            SandboxErrorKind::ExecutionTimeout { function, duration } => {
                write!(
                    f,
                    "guest function '{function}' timed out after {} ms; retry with a fresh context or raise the timeout",
                    duration.as_millis()
                )
            }
            SandboxErrorKind::Cancelled => write!(f, "call was cancelled by the caller"),
            SandboxErrorKind::InvalidArgument { argument, reason } => {
                write!(f, "invalid argument '{argument}': {reason}")
            }
            SandboxErrorKind::StaleHandle { handle } => {
                write!(
                    f,
                    "handle {handle} does not belong to the current call; handles are only valid within the call that produced them"
                )
            }
            SandboxErrorKind::OutOfBounds {
                offset,
                length,
                memory_size,
            } => {
                write!(
                    f,
                    "memory access of {length} bytes at offset {offset} exceeds guest memory size {memory_size}"
                )
            }
            SandboxErrorKind::ExportNotFound { name } => {
                write!(f, "guest module does not implement '{name}'")
            }
            SandboxErrorKind::Fault { reason } => write!(f, "call faulted: {reason}"),
            SandboxErrorKind::Internal { message } => {
                write!(f, "internal runtime error: {message}")
            }
        }
    }
}

impl Error for SandboxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn Error + 'static))
    }
}

/// Convenience alias for runtime results.
pub type Result<T, E = SandboxError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Cause;

    impl fmt::Display for Cause {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "disk on fire")
        }
    }

    impl Error for Cause {}

    #[test]
    fn timeout_display() {
        let err = SandboxError::timeout("handleEvent", Duration::from_millis(250));
        let msg = err.to_string();
        assert!(msg.contains("handleEvent"));
        assert!(msg.contains("250 ms"));
    }

    #[test]
    fn out_of_bounds_display() {
        let err = SandboxError::out_of_bounds(65530, 16, 65536);
        let msg = err.to_string();
        assert!(msg.contains("16 bytes"));
        assert!(msg.contains("65530"));
        assert!(msg.contains("65536"));
    }

    #[test]
    fn duplicate_function_display() {
        let err = SandboxError::duplicate_function("store", "takeToken");
        assert!(err.to_string().contains("store.takeToken"));
    }

    #[test]
    fn classes_map_to_taxonomy() {
        assert_eq!(
            SandboxError::compilation_failed("x").class(),
            ErrorClass::Construction
        );
        assert_eq!(SandboxError::shutting_down().class(), ErrorClass::Borrow);
        assert_eq!(SandboxError::call_failed("f", "x").class(), ErrorClass::Call);
        assert_eq!(
            SandboxError::decode_failed("Lock", "x").class(),
            ErrorClass::Call
        );
        assert_eq!(SandboxError::cancelled().class(), ErrorClass::Cancellation);
        assert_eq!(
            SandboxError::stale_handle(7).class(),
            ErrorClass::InvalidArgument
        );
        assert_eq!(
            SandboxError::out_of_bounds(0, 1, 0).class(),
            ErrorClass::Bounds
        );
        assert_eq!(
            SandboxError::export_not_found("handleEvent").class(),
            ErrorClass::NotImplemented
        );
        assert_eq!(SandboxError::fault("boom").class(), ErrorClass::Fault);
    }

    #[test]
    fn only_timeout_and_cancellation_are_retriable() {
        assert!(SandboxError::timeout("f", Duration::from_secs(1)).is_retriable());
        assert!(SandboxError::cancelled().is_retriable());
        assert!(!SandboxError::call_failed("f", "bad").is_retriable());
        assert!(!SandboxError::validation_failed("bad").is_retriable());
        assert!(!SandboxError::shutting_down().is_retriable());
    }

    #[test]
    fn source_preserves_cause_chain() {
        let err = SandboxError::call_failed("store.takeToken", "store unavailable").with_source(Cause);
        let source = err.source().expect("source should be set");
        assert_eq!(source.to_string(), "disk on fire");
    }

    #[test]
    fn equality_ignores_source() {
        let a = SandboxError::cancelled();
        let b = SandboxError::cancelled().with_source(Cause);
        assert_eq!(a, b);
    }

    #[test]
    fn error_class_display() {
        assert_eq!(ErrorClass::InvalidArgument.to_string(), "invalid-argument");
        assert_eq!(ErrorClass::NotImplemented.to_string(), "not-implemented");
    }
}
