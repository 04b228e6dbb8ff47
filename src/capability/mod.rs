//! Host capabilities offered to guests.
//!
//! Which capabilities a pool binds is fixed by its [`PoolOptions`]: a list
//! of [`Capability`] values, each of which is a [`TraitFactory`].
//!
//! [`PoolOptions`]: crate::pool::PoolOptions

mod env;
mod handlers;
mod lock_api;
mod store;
mod traits;

pub use env::{EnvTrait, ENV_GROUP};
pub use handlers::{
    handle_event, rewrite_headers, HandlersTrait, HANDLE_EVENT_EXPORT, REWRITE_HEADERS_EXPORT,
};
pub use lock_api::{LockApiTrait, API_GROUP};
pub use store::{StoreTrait, STORE_GROUP};
pub use traits::{HostTrait, TraitFactory};

use crate::api::LockClient;
use crate::error::Result;
use crate::interop::{InteropTrait, StringDecoder, INTEROP_GROUP};
use crate::pool::ContextHandle;
use crate::tokens::PersistentStore;
use std::sync::Arc;

/// Group name reported by [`Capability::Handlers`].
pub const HANDLERS_GROUP: &str = "handlers";

/// A capability a pool binds to each of its contexts.
#[derive(Debug, Clone)]
pub enum Capability {
    /// `env.abort`, `env.trace` and `env.seed`.
    Env {
        /// Layout of guest strings.
        decoder: StringDecoder,
    },
    /// `store.takeToken` and `store.releaseTokens`.
    TokenStore {
        /// Backing store shared by every context.
        store: Arc<dyn PersistentStore>,
        /// Layout of guest strings.
        decoder: StringDecoder,
    },
    /// `interop.*` buffer functions.
    Interop,
    /// `api.upsertLock`.
    LockApi {
        /// Client the upserts are forwarded to.
        client: Arc<dyn LockClient>,
    },
    /// Requires the guest to export the plugin entry points.
    Handlers,
    /// Any other factory.
    Custom(Arc<dyn TraitFactory>),
}

impl Capability {
    /// The `env` capability for AssemblyScript guests.
    #[must_use]
    pub fn env() -> Self {
        Self::Env {
            decoder: StringDecoder::default(),
        }
    }

    /// The `store` capability for AssemblyScript guests.
    #[must_use]
    pub fn token_store(store: Arc<dyn PersistentStore>) -> Self {
        Self::TokenStore {
            store,
            decoder: StringDecoder::default(),
        }
    }

    /// The `api` capability.
    #[must_use]
    pub fn lock_api(client: Arc<dyn LockClient>) -> Self {
        Self::LockApi { client }
    }

    /// Wraps a custom factory.
    #[must_use]
    pub fn custom(factory: impl TraitFactory + 'static) -> Self {
        Self::Custom(Arc::new(factory))
    }

    /// Switches the string layout of capabilities that decode strings.
    #[must_use]
    pub fn with_decoder(self, decoder: StringDecoder) -> Self {
        match self {
            Self::Env { .. } => Self::Env { decoder },
            Self::TokenStore { store, .. } => Self::TokenStore { store, decoder },
            other => other,
        }
    }
}

impl TraitFactory for Capability {
    fn group(&self) -> &str {
        match self {
            Self::Env { .. } => ENV_GROUP,
            Self::TokenStore { .. } => STORE_GROUP,
            Self::Interop => INTEROP_GROUP,
            Self::LockApi { .. } => API_GROUP,
            Self::Handlers => HANDLERS_GROUP,
            Self::Custom(factory) => factory.group(),
        }
    }

    fn create_trait(&self, ctx: &ContextHandle) -> Result<Box<dyn HostTrait>> {
        Ok(match self {
            Self::Env { decoder } => Box::new(EnvTrait::new(ctx.clone(), *decoder)),
            Self::TokenStore { store, decoder } => {
                Box::new(StoreTrait::new(ctx.clone(), store.clone(), *decoder))
            }
            Self::Interop => Box::new(InteropTrait::new(ctx.clone())),
            Self::LockApi { client } => Box::new(LockApiTrait::new(ctx.clone(), client.clone())),
            Self::Handlers => Box::new(HandlersTrait::new()),
            Self::Custom(factory) => return factory.create_trait(ctx),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DryRunLockClient;
    use crate::runtime::ImportNamespace;
    use crate::tokens::InMemoryTokenStore;

    #[test]
    fn groups_match_import_modules() {
        let store: Arc<dyn PersistentStore> = Arc::new(InMemoryTokenStore::new());
        assert_eq!(Capability::env().group(), "env");
        assert_eq!(Capability::token_store(store).group(), "store");
        assert_eq!(Capability::Interop.group(), "interop");
        assert_eq!(
            Capability::lock_api(Arc::new(DryRunLockClient::new())).group(),
            "api"
        );
        assert_eq!(Capability::Handlers.group(), "handlers");
    }

    #[test]
    fn with_decoder_only_touches_string_capabilities() {
        match Capability::env().with_decoder(StringDecoder::CString) {
            Capability::Env { decoder } => assert_eq!(decoder, StringDecoder::CString),
            other => panic!("unexpected capability {other:?}"),
        }
        assert!(matches!(
            Capability::Interop.with_decoder(StringDecoder::CString),
            Capability::Interop
        ));
    }

    #[tokio::test]
    async fn created_traits_register_their_functions() {
        let ctx = ContextHandle::new(0, tokio::runtime::Handle::current());
        let store: Arc<dyn PersistentStore> = Arc::new(InMemoryTokenStore::new());
        let capabilities = [
            Capability::env(),
            Capability::token_store(store),
            Capability::Interop,
            Capability::lock_api(Arc::new(DryRunLockClient::new())),
            Capability::Handlers,
        ];

        let mut imports = ImportNamespace::new();
        for capability in &capabilities {
            capability
                .create_trait(&ctx)
                .unwrap()
                .export_to_guest(&mut imports)
                .unwrap();
        }

        assert!(imports.contains("env", "abort"));
        assert!(imports.contains("store", "takeToken"));
        assert!(imports.contains("interop", "registerBuffer"));
        assert!(imports.contains("api", "upsertLock"));
        assert_eq!(imports.len(), 3 + 2 + 4 + 1);
    }

    #[tokio::test]
    async fn registering_a_capability_twice_is_rejected() {
        let ctx = ContextHandle::new(0, tokio::runtime::Handle::current());
        let mut imports = ImportNamespace::new();
        let first = Capability::Interop.create_trait(&ctx).unwrap();
        let second = Capability::Interop.create_trait(&ctx).unwrap();
        first.export_to_guest(&mut imports).unwrap();
        assert!(second.export_to_guest(&mut imports).is_err());
    }
}
