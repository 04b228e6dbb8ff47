//! `store` group: token scopes backed by a [`PersistentStore`].

use super::HostTrait;
use crate::error::Result;
use crate::interop::StringDecoder;
use crate::pool::ContextHandle;
use crate::runtime::{i32_arg, FunctionType, HostFunction, ImportNamespace, Value, ValueType};
use crate::tokens::{ttl_from_seconds, PersistentStore, ScopeKey};
use std::sync::Arc;

/// Import group of the token store functions.
pub const STORE_GROUP: &str = "store";

/// `takeToken` and `releaseTokens` for one execution context.
#[derive(Debug)]
pub struct StoreTrait {
    ctx: ContextHandle,
    store: Arc<dyn PersistentStore>,
    decoder: StringDecoder,
}

impl StoreTrait {
    /// Binds the trait to `ctx`.
    #[must_use]
    pub fn new(ctx: ContextHandle, store: Arc<dyn PersistentStore>, decoder: StringDecoder) -> Self {
        Self {
            ctx,
            store,
            decoder,
        }
    }
}

impl HostTrait for StoreTrait {
    fn export_to_guest(&self, imports: &mut ImportNamespace) -> Result<()> {
        let (ctx, store, decoder) = (self.ctx.clone(), self.store.clone(), self.decoder);
        let take_token = HostFunction::new(
            FunctionType::new([ValueType::I32, ValueType::I32], [ValueType::I32]),
            move |call, args| {
                let raw = decoder.decode(call.memory(), i32_arg(args, 0, "scope")?)?;
                let scope = ScopeKey::parse(raw)?;
                let ttl = ttl_from_seconds(i64::from(i32_arg(args, 1, "ttl")?))?;
                let count = ctx.block_on(store.take_token(&scope, ttl))??;
                tracing::debug!(
                    slot = ctx.slot(),
                    %scope,
                    ttl_secs = ttl.as_secs(),
                    count,
                    "Token taken"
                );
                Ok(vec![Value::I32(count)])
            },
        );

        let (ctx, store, decoder) = (self.ctx.clone(), self.store.clone(), self.decoder);
        let release_tokens = HostFunction::new(
            FunctionType::new([ValueType::I32], []),
            move |call, args| {
                let raw = decoder.decode(call.memory(), i32_arg(args, 0, "scope")?)?;
                let scope = ScopeKey::parse(raw)?;
                ctx.block_on(store.release_tokens(&scope))??;
                tracing::debug!(slot = ctx.slot(), %scope, "Tokens released");
                Ok(Vec::new())
            },
        );

        imports.register(
            STORE_GROUP,
            [("takeToken", take_token), ("releaseTokens", release_tokens)],
        )
    }
}
