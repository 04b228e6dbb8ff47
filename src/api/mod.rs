//! Domain API types and the client guests reach through the `api` group.

mod client;
mod error;
mod lock;

pub use client::{DryRunLockClient, LockClient};
pub use error::{ApiError, ApiErrorKind};
pub use lock::{
    Lock, LockSpec, LockTarget, Metadata, DEFAULT_NAMESPACE, KIND_LOCK, LOCK_VERSION,
};
