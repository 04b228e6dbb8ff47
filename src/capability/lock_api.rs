//! `api` group: domain API calls made on behalf of the guest.

use super::HostTrait;
use crate::api::{Lock, LockClient};
use crate::error::Result;
use crate::interop::consume_message;
use crate::pool::ContextHandle;
use crate::runtime::{i32_arg, FunctionType, HostFunction, ImportNamespace, ValueType};
use std::sync::Arc;

/// Import group of the domain API functions.
pub const API_GROUP: &str = "api";

/// `upsertLock` for one execution context.
#[derive(Debug)]
pub struct LockApiTrait {
    ctx: ContextHandle,
    client: Arc<dyn LockClient>,
}

impl LockApiTrait {
    /// Binds the trait to `ctx`.
    #[must_use]
    pub fn new(ctx: ContextHandle, client: Arc<dyn LockClient>) -> Self {
        Self { ctx, client }
    }
}

impl HostTrait for LockApiTrait {
    fn export_to_guest(&self, imports: &mut ImportNamespace) -> Result<()> {
        let (ctx, client) = (self.ctx.clone(), self.client.clone());
        let upsert_lock = HostFunction::new(
            FunctionType::new([ValueType::I32], []),
            move |_call, args| {
                let handle = i32_arg(args, 0, "handle")?;
                let mut lock: Lock = consume_message(&ctx, handle)?;
                lock.check_and_set_defaults()?;
                ctx.block_on(client.upsert_lock(&lock))??;
                tracing::info!(slot = ctx.slot(), name = lock.name(), "Lock upserted");
                Ok(Vec::new())
            },
        );

        imports.define(API_GROUP, "upsertLock", upsert_lock)
    }
}
