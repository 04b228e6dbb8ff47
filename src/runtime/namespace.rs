//! Host functions and the import namespace guests link against.

use super::traits::LinearMemory;
use super::value::{FunctionType, Value};
use crate::error::{Result, SandboxError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What a host function sees while the guest is calling it.
///
/// `memory` is the calling instance's linear memory, queried live, so reads
/// always see the size the guest has grown it to so far.
pub struct HostCall<'a> {
    memory: &'a dyn LinearMemory,
}

impl<'a> HostCall<'a> {
    /// Wraps the calling instance's memory.
    pub fn new(memory: &'a dyn LinearMemory) -> Self {
        Self { memory }
    }

    /// The calling instance's linear memory.
    #[must_use]
    pub fn memory(&self) -> &dyn LinearMemory {
        self.memory
    }
}

type HostCallback = dyn Fn(&HostCall<'_>, &[Value]) -> Result<Vec<Value>> + Send + Sync;

/// A typed, guest-callable host function.
#[derive(Clone)]
pub struct HostFunction {
    ty: FunctionType,
    callback: Arc<HostCallback>,
}

impl HostFunction {
    /// Creates a host function with the given signature.
    pub fn new(
        ty: FunctionType,
        callback: impl Fn(&HostCall<'_>, &[Value]) -> Result<Vec<Value>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            ty,
            callback: Arc::new(callback),
        }
    }

    /// The function's signature.
    #[must_use]
    pub fn ty(&self) -> &FunctionType {
        &self.ty
    }

    /// Type-checks `args` and invokes the callback.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error on signature mismatch, otherwise
    /// whatever the callback returns.
    pub fn call(&self, name: &str, caller: &HostCall<'_>, args: &[Value]) -> Result<Vec<Value>> {
        self.ty.check_args(name, args)?;
        (self.callback)(caller, args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}

/// Grouped host functions offered to a guest at instantiation.
///
/// Groups correspond to guest import modules (`env`, `store`, `interop`,
/// `api`). A `(group, name)` pair can only be defined once.
#[derive(Debug, Clone, Default)]
pub struct ImportNamespace {
    groups: BTreeMap<String, BTreeMap<String, HostFunction>>,
}

impl ImportNamespace {
    /// Creates an empty namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a single function.
    ///
    /// # Errors
    ///
    /// Returns a duplicate function error if `group.name` already exists.
    pub fn define(
        &mut self,
        group: &str,
        name: &str,
        function: HostFunction,
    ) -> Result<()> {
        let functions = self.groups.entry(group.to_string()).or_default();
        if functions.contains_key(name) {
            return Err(SandboxError::duplicate_function(group, name));
        }
        functions.insert(name.to_string(), function);
        Ok(())
    }

    /// Defines every function of `group`.
    ///
    /// # Errors
    ///
    /// Returns a duplicate function error on the first name already present.
    pub fn register<N>(
        &mut self,
        group: &str,
        functions: impl IntoIterator<Item = (N, HostFunction)>,
    ) -> Result<()>
    where
        N: AsRef<str>,
    {
        for (name, function) in functions {
            self.define(group, name.as_ref(), function)?;
        }
        Ok(())
    }

    /// Looks up `group.name`.
    #[must_use]
    pub fn get(&self, group: &str, name: &str) -> Option<&HostFunction> {
        self.groups.get(group).and_then(|g| g.get(name))
    }

    /// Returns true if `group.name` is defined.
    #[must_use]
    pub fn contains(&self, group: &str, name: &str) -> bool {
        self.get(group, name).is_some()
    }

    /// Iterates over every `(group, name, function)` triple.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &HostFunction)> {
        self.groups.iter().flat_map(|(group, functions)| {
            functions
                .iter()
                .map(move |(name, f)| (group.as_str(), name.as_str(), f))
        })
    }

    /// Total number of functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
