//! Domain API client errors.

use crate::error::SandboxError;
use std::fmt;

/// Errors raised by a [`LockClient`](super::LockClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    kind: Box<ApiErrorKind>,
}

/// Specific API error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The server refused the request.
    Rejected {
        /// Operation that was refused
        operation: String,
        /// Reason given by the server
        reason: String,
    },
    /// The server could not be reached.
    Unavailable {
        /// Transport error
        reason: String,
    },
    /// The request was abandoned because the caller cancelled.
    Cancelled,
}

impl ApiError {
    /// Creates a new API error with the given kind.
    #[must_use]
    pub fn new(kind: ApiErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &ApiErrorKind {
        &self.kind
    }

    /// Creates a rejected error.
    #[must_use]
    pub fn rejected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Rejected {
            operation: operation.into(),
            reason: reason.into(),
        })
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unavailable {
            reason: reason.into(),
        })
    }

    /// Creates a cancelled error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ApiErrorKind::Cancelled)
    }

    /// Returns true if the server could not be reached.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(*self.kind, ApiErrorKind::Unavailable { .. })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_ref() {
            ApiErrorKind::Rejected { operation, reason } => {
                write!(f, "{operation} was rejected by the server: {reason}")
            }
            ApiErrorKind::Unavailable { reason } => {
                write!(f, "API server unavailable: {reason}; check the connection")
            }
            ApiErrorKind::Cancelled => write!(f, "API request was cancelled"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<ApiError> for SandboxError {
    fn from(error: ApiError) -> Self {
        match error.kind() {
            ApiErrorKind::Cancelled => SandboxError::cancelled().with_source(error),
            _ => SandboxError::call_failed("api", error.to_string()).with_source(error),
        }
    }
}
