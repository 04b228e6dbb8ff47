//! Lock resource as sent by guests.

use crate::error::{Result, SandboxError};
use crate::interop::InteropMessage;
use std::collections::HashMap;

/// Resource kind every lock carries.
pub const KIND_LOCK: &str = "lock";

/// Current lock resource version.
pub const LOCK_VERSION: &str = "v2";

/// Namespace assigned when the guest leaves it empty.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A lock that blocks interactions matching its target.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Lock {
    /// Resource kind, always `lock`.
    #[prost(string, tag = "1")]
    pub kind: String,
    /// Resource sub-kind.
    #[prost(string, tag = "2")]
    pub sub_kind: String,
    /// Resource version.
    #[prost(string, tag = "3")]
    pub version: String,
    /// Resource metadata.
    #[prost(message, optional, tag = "4")]
    pub metadata: Option<Metadata>,
    /// Lock specification.
    #[prost(message, optional, tag = "5")]
    pub spec: Option<LockSpec>,
}

/// Resource metadata.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Metadata {
    /// Resource name, required.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Resource namespace.
    #[prost(string, tag = "2")]
    pub namespace: String,
    /// Human readable description.
    #[prost(string, tag = "3")]
    pub description: String,
    /// Free-form labels.
    #[prost(map = "string, string", tag = "4")]
    pub labels: HashMap<String, String>,
}

/// What the lock targets and for how long.
#[derive(Clone, PartialEq, prost::Message)]
pub struct LockSpec {
    /// Matching criteria; at least one field must be set.
    #[prost(message, optional, tag = "1")]
    pub target: Option<LockTarget>,
    /// Message shown to locked-out users.
    #[prost(string, tag = "2")]
    pub message: String,
    /// Expiry as seconds since the Unix epoch, 0 for none.
    #[prost(int64, tag = "3")]
    pub expires_unix: i64,
}

/// Lock target. A field that is set must match for the lock to apply.
#[derive(Clone, PartialEq, prost::Message)]
pub struct LockTarget {
    #[prost(string, tag = "1")]
    pub user: String,
    #[prost(string, tag = "2")]
    pub role: String,
    #[prost(string, tag = "3")]
    pub login: String,
    #[prost(string, tag = "4")]
    pub node: String,
    #[prost(string, tag = "5")]
    pub mfa_device: String,
    #[prost(string, tag = "6")]
    pub windows_desktop: String,
    #[prost(string, tag = "7")]
    pub access_request: String,
}

impl LockTarget {
    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        [
            &self.user,
            &self.role,
            &self.login,
            &self.node,
            &self.mfa_device,
            &self.windows_desktop,
            &self.access_request,
        ]
        .iter()
        .all(|field| field.is_empty())
    }
}

impl Lock {
    /// Fills in kind, version and namespace, then validates the lock.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the kind is wrong, the name is
    /// missing, or the target is empty.
    pub fn check_and_set_defaults(&mut self) -> Result<()> {
        if self.kind.is_empty() {
            self.kind = KIND_LOCK.to_string();
        } else if self.kind != KIND_LOCK {
            return Err(SandboxError::validation_failed(format!(
                "expected kind '{KIND_LOCK}', got '{}'",
                self.kind
            )));
        }

        if self.version.is_empty() {
            self.version = LOCK_VERSION.to_string();
        }

        let metadata = self.metadata.get_or_insert_with(Metadata::default);
        if metadata.name.trim().is_empty() {
            return Err(SandboxError::validation_failed("lock name must be set"));
        }
        if metadata.namespace.is_empty() {
            metadata.namespace = DEFAULT_NAMESPACE.to_string();
        }

        let has_target = self
            .spec
            .as_ref()
            .and_then(|spec| spec.target.as_ref())
            .is_some_and(|target| !target.is_empty());
        if !has_target {
            return Err(SandboxError::validation_failed(
                "at least one lock target field must be set",
            ));
        }

        Ok(())
    }

    /// The lock name, empty if metadata is missing.
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata.as_ref().map_or("", |m| m.name.as_str())
    }
}

impl InteropMessage for Lock {
    const TYPE: &'static str = "types.LockV2";
}
