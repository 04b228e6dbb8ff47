//! Configuration file loading.
//!
//! This module handles loading plugin host configuration from TOML files
//! at XDG-compliant locations.

use crate::config::types::HostConfig;
use crate::error::{Result, SandboxError};
use std::path::{Path, PathBuf};

/// Default configuration file name for project-local config.
const LOCAL_CONFIG_NAME: &str = "plugin-host.toml";

/// Default configuration file name within XDG config directory.
const XDG_CONFIG_NAME: &str = "config.toml";

/// Application name for XDG directory lookup.
const APP_NAME: &str = "plugin-host";

/// Loads configuration from the default search paths.
///
/// Search order:
/// 1. `./plugin-host.toml` (project-local)
/// 2. `~/.config/plugin-host/config.toml` (XDG config)
///
/// Returns the default configuration if no config file is found.
///
/// # Errors
///
/// Returns an error if a config file exists but cannot be parsed.
pub fn load() -> Result<HostConfig> {
    for path in search_paths() {
        if path.exists() {
            tracing::debug!(path = %path.display(), "Loading configuration");
            return from_path(&path);
        }
    }
    Ok(HostConfig::default())
}

/// Loads configuration from a specific file path.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read
/// - The file contains invalid TOML
/// - The TOML doesn't match the expected schema
pub fn from_path(path: &Path) -> Result<HostConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        SandboxError::invalid_configuration(
            "config_file",
            format!("failed to read '{}': {}", path.display(), e),
        )
        .with_source(e)
    })?;

    from_str(&contents).map_err(|e| {
        SandboxError::invalid_configuration(
            "config_file",
            format!("failed to parse '{}': {}", path.display(), e),
        )
    })
}

/// Parses configuration from a TOML string.
///
/// # Errors
///
/// Returns an error if the TOML is invalid or doesn't match the schema.
pub fn from_str(toml_str: &str) -> Result<HostConfig> {
    toml::from_str(toml_str).map_err(|e| {
        SandboxError::invalid_configuration("config", format!("invalid TOML: {e}")).with_source(e)
    })
}

/// Returns the paths that would be searched for configuration files.
#[must_use]
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_NAME)];

    if let Some(config_dir) = xdg_config_dir() {
        paths.push(config_dir.join(XDG_CONFIG_NAME));
    }

    paths
}

/// Returns the path to the XDG config directory for the plugin host.
///
/// This is `~/.config/plugin-host` on most systems.
#[must_use]
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME))
}
