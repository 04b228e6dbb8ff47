//! Configuration management for the plugin host.
//!
//! # Configuration File Format
//!
//! Configuration is stored in TOML format. The search order is:
//! 1. `./plugin-host.toml` (project-local)
//! 2. `~/.config/plugin-host/config.toml` (XDG config)
//!
//! # Example Configuration
//!
//! ```toml
//! string_encoding = "assemblyscript"
//!
//! [pool]
//! module = "build/plugin.wasm"
//! concurrency = 4
//! timeout_secs = 30
//! memory_limit = 67108864
//!
//! [token_store]
//! backend = "libsql"
//! path = "tokens.db"
//! ttl_policy = "extend_on_take"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use acton_plugins::config;
//!
//! let config = config::load()?;
//! config.validate()?;
//! ```

mod file;
mod types;

pub use file::{from_path, from_str, load, search_paths, xdg_config_dir};
pub use types::{
    HostConfig, PoolSection, StoreBackend, TokenStoreSection, DEFAULT_MEMORY_LIMIT,
    DEFAULT_STORE_PATH,
};
