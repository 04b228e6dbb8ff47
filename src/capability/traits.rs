//! Two-phase capability interface.
//!
//! A [`TraitFactory`] is invoked once per pool slot. The [`HostTrait`] it
//! creates registers its host functions before the guest is instantiated,
//! and may bind guest exports afterwards.

use crate::error::Result;
use crate::pool::ContextHandle;
use crate::runtime::{GuestInstance, ImportNamespace};
use std::fmt::Debug;

/// Creates the per-context instance of a capability.
///
/// # Example
///
/// ```rust,ignore
/// use acton_plugins::prelude::*;
///
/// #[derive(Debug)]
/// struct ClockFactory;
///
/// impl TraitFactory for ClockFactory {
///     fn group(&self) -> &str {
///         "clock"
///     }
///
///     fn create_trait(&self, ctx: &ContextHandle) -> Result<Box<dyn HostTrait>> {
///         Ok(Box::new(ClockTrait::new(ctx.clone())))
///     }
/// }
/// ```
pub trait TraitFactory: Send + Sync + Debug {
    /// Import group the created traits register under, used in errors and logs.
    fn group(&self) -> &str;

    /// Creates a trait bound to the context that is being built.
    ///
    /// The context has no instance yet; only its handle exists.
    ///
    /// # Errors
    ///
    /// Any error aborts pool construction.
    fn create_trait(&self, ctx: &ContextHandle) -> Result<Box<dyn HostTrait>>;
}

/// A capability bound to exactly one execution context.
pub trait HostTrait: Send + Sync + Debug {
    /// Registers guest-callable host functions.
    ///
    /// # Errors
    ///
    /// Returns a duplicate function error if another trait already defined
    /// one of the names.
    fn export_to_guest(&self, imports: &mut ImportNamespace) -> Result<()>;

    /// Binds guest exports after instantiation.
    ///
    /// # Errors
    ///
    /// Returns an error if a required export is missing.
    fn import_from_guest(&mut self, _instance: &dyn GuestInstance) -> Result<()> {
        Ok(())
    }
}
