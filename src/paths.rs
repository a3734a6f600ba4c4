//! Centralized filesystem paths for wikiclerk.
//!
//! Single source of truth for where the settings file, the job store and
//! the replica mirrors live. Uses the [`dirs`] crate for platform-appropriate
//! resolution.
//!
//! # Environment Overrides
//!
//! - `WIKICLERK_DATA_DIR` overrides [`data_dir`]
//! - `WIKICLERK_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Holds the job store database and, by default, the replica mirror
/// directory. Resolves to `dirs::data_dir()/wikiclerk/` unless overridden
/// with `WIKICLERK_DATA_DIR`.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("WIKICLERK_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("wikiclerk"))
        .unwrap_or_else(|| PathBuf::from("/tmp/wikiclerk-data"))
}

/// Application config directory (`settings.toml` lives here).
///
/// Resolves to `dirs::config_dir()/wikiclerk/` unless overridden with
/// `WIKICLERK_CONFIG_DIR`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("WIKICLERK_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("wikiclerk"))
        .unwrap_or_else(|| PathBuf::from("/tmp/wikiclerk-config"))
}

/// Default settings file path (`config_dir()/settings.toml`).
#[must_use]
pub fn settings_file() -> PathBuf {
    config_dir().join("settings.toml")
}

/// Default job store database path (`data_dir()/clerk.db`).
#[must_use]
pub fn store_file() -> PathBuf {
    data_dir().join("clerk.db")
}

/// Default replica mirror directory (`data_dir()/replicas/`).
#[must_use]
pub fn replica_dir() -> PathBuf {
    data_dir().join("replicas")
}
