//! Process-level settings for the wikiclerk binary.
//!
//! These are operator-facing settings loaded once at startup from a TOML
//! file. Per-task configuration is a separate concern and lives on wiki
//! pages (see [`crate::task::settings`]).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ClerkError, Result};

/// Top-level settings tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    /// Wiki API access settings.
    pub wiki: WikiSettings,
    /// Job/trial store settings.
    pub store: StoreSettings,
    /// Read-replica mirror settings.
    pub replica: ReplicaSettings,
}

/// Wiki API access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WikiSettings {
    /// User-Agent header sent with every request.
    pub user_agent: String,
    /// Bot account username (None = anonymous, read-only use).
    pub username: Option<String>,
    /// Bot password from Special:BotPasswords.
    pub bot_password: Option<String>,
    /// Action API URL template; `{site}` and `{family}` are substituted.
    pub api_url_template: String,
    /// Exact API URL overrides keyed by `"site.family"`.
    pub api_url_overrides: HashMap<String, String>,
    /// EventStreams recent-change feed URL.
    pub stream_url: String,
    /// Site used for commands that are not bound to a task (`whoami`).
    pub default_site: String,
    /// Family used for commands that are not bound to a task.
    pub default_family: String,
}

impl Default for WikiSettings {
    fn default() -> Self {
        Self {
            user_agent: format!("wikiclerk/{}", env!("CARGO_PKG_VERSION")),
            username: None,
            bot_password: None,
            api_url_template: "https://{site}.{family}.org/w/api.php".to_owned(),
            api_url_overrides: HashMap::new(),
            stream_url: "https://stream.wikimedia.org/v2/stream/recentchange".to_owned(),
            default_site: "en".to_owned(),
            default_family: "wikipedia".to_owned(),
        }
    }
}

/// Job/trial store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Database file path (None = `data_dir()/clerk.db`).
    pub path: Option<PathBuf>,
}

impl StoreSettings {
    /// Resolved database path.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(crate::paths::store_file)
    }
}

/// Read-replica mirror configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaSettings {
    /// Directory holding one SQLite mirror per wiki database
    /// (None = `data_dir()/replicas`).
    pub dir: Option<PathBuf>,
}

impl ReplicaSettings {
    /// Resolved mirror directory.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(crate::paths::replica_dir)
    }
}

impl BotSettings {
    /// Load settings from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ClerkError::Config(e.to_string()))
    }

    /// Load from `path` when given, otherwise from the default location,
    /// falling back to defaults when no file exists there.
    ///
    /// An explicit `path` that does not exist is an error; a missing file
    /// at the default location is not.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default = crate::paths::settings_file();
                if default.exists() {
                    Self::from_file(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Save settings to a TOML file, creating parent directories as needed.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ClerkError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
