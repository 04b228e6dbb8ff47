//! Token store error types.

use crate::error::SandboxError;
use std::fmt;

/// Errors raised by a persisted token store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    kind: Box<StoreErrorKind>,
}

/// Specific token store error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The backing database could not be opened.
    DatabaseOpen {
        /// Path to the database file
        path: String,
        /// Error message from the database
        message: String,
    },
    /// The schema could not be created.
    SchemaInit {
        /// Error message from the database
        message: String,
    },
    /// A query failed.
    QueryFailed {
        /// The operation that failed
        operation: String,
        /// Error message from the database
        message: String,
    },
    /// The scope key was rejected.
    InvalidScope {
        /// Why it was rejected
        reason: String,
    },
    /// The TTL was rejected.
    InvalidTtl {
        /// The TTL in seconds the caller asked for
        seconds: i64,
    },
}

impl StoreError {
    /// Creates a new store error with the given kind.
    #[must_use]
    pub fn new(kind: StoreErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &StoreErrorKind {
        &self.kind
    }

    /// Creates a database open error.
    #[must_use]
    pub fn database_open(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::DatabaseOpen {
            path: path.into(),
            message: message.into(),
        })
    }

    /// Creates a schema initialization error.
    #[must_use]
    pub fn schema_init(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::SchemaInit {
            message: message.into(),
        })
    }

    /// Creates a query failed error.
    #[must_use]
    pub fn query_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::QueryFailed {
            operation: operation.into(),
            message: message.into(),
        })
    }

    /// Creates an invalid scope error.
    #[must_use]
    pub fn invalid_scope(reason: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::InvalidScope {
            reason: reason.into(),
        })
    }

    /// Creates an invalid TTL error.
    #[must_use]
    pub fn invalid_ttl(seconds: i64) -> Self {
        Self::new(StoreErrorKind::InvalidTtl { seconds })
    }

    /// Returns true if the caller passed a bad scope or TTL.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            *self.kind,
            StoreErrorKind::InvalidScope { .. } | StoreErrorKind::InvalidTtl { .. }
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_ref() {
            StoreErrorKind::DatabaseOpen { path, message } => {
                write!(
                    f,
                    "failed to open token database at '{path}': {message}; check file permissions and path"
                )
            }
            StoreErrorKind::SchemaInit { message } => {
                write!(
                    f,
                    "failed to initialize token schema: {message}; database may be corrupted"
                )
            }
            StoreErrorKind::QueryFailed { operation, message } => {
                write!(f, "{operation} query failed: {message}")
            }
            StoreErrorKind::InvalidScope { reason } => {
                write!(f, "invalid token scope: {reason}")
            }
            StoreErrorKind::InvalidTtl { seconds } => {
                write!(f, "invalid token TTL {seconds}s; TTL must be positive")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for SandboxError {
    fn from(error: StoreError) -> Self {
        match error.kind() {
            StoreErrorKind::InvalidScope { reason } => {
                SandboxError::invalid_argument("scope", reason.clone()).with_source(error)
            }
            StoreErrorKind::InvalidTtl { .. } => {
                SandboxError::invalid_argument("ttl", error.to_string()).with_source(error)
            }
            _ => SandboxError::call_failed("store", error.to_string()).with_source(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn database_open_display() {
        let error = StoreError::database_open("/data/tokens.db", "permission denied");
        let msg = error.to_string();
        assert!(msg.contains("/data/tokens.db"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn query_failed_display() {
        let error = StoreError::query_failed("take_token", "disk I/O error");
        let msg = error.to_string();
        assert!(msg.contains("take_token"));
        assert!(msg.contains("disk I/O error"));
    }

    #[test]
    fn invalid_scope_converts_to_invalid_argument() {
        let error: SandboxError = StoreError::invalid_scope("scope must not be blank").into();
        assert_eq!(error.class(), ErrorClass::InvalidArgument);
    }

    #[test]
    fn invalid_ttl_converts_to_invalid_argument() {
        let error = StoreError::invalid_ttl(0);
        assert!(error.is_invalid_argument());
        let error: SandboxError = error.into();
        assert!(error.is_invalid_argument());
    }

    #[test]
    fn query_failure_converts_to_call_error() {
        let error: SandboxError = StoreError::query_failed("release_tokens", "locked").into();
        assert_eq!(error.class(), ErrorClass::Call);
        assert!(std::error::Error::source(&error).is_some());
    }
}
