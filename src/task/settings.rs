//! Remote task configuration loader.
//!
//! Each task reads its knobs from a JSON blob on a wiki page, so wiki
//! administrators can retune a running bot without a deploy. Lines whose
//! first non-blank characters are `//` are comments; `//` inside values
//! (URLs) is data. The blob is cached and refetched lazily after a TTL.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::{ClerkError, Result};
use crate::wiki::api::WikiApi;

/// Parsed configuration object.
pub type ConfigMap = serde_json::Map<String, Value>;

/// How long a fetched configuration stays fresh.
pub const CONFIG_TTL: Duration = Duration::from_secs(15 * 60);

/// Cached remote configuration for one task.
#[derive(Debug, Default)]
pub struct TaskSettings {
    page: Option<String>,
    cache: Option<ConfigMap>,
    loaded_at: Option<Instant>,
}

impl TaskSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the wiki page this task's configuration lives on.
    /// Fetching stays lazy.
    pub fn register(&mut self, page: impl Into<String>) {
        self.page = Some(page.into());
    }

    /// The registered source page, if any.
    pub fn registered(&self) -> Option<&str> {
        self.page.as_deref()
    }

    /// Drop the cached copy so the next read refetches immediately.
    /// Used by tasks that observe a config-page change event.
    pub fn invalidate(&mut self) {
        self.loaded_at = None;
    }

    /// Fetch when never loaded or stale; no-op inside the TTL.
    ///
    /// Returns `Some((old, new))` when a load actually happened so the
    /// caller can dispatch its reload hook.
    pub fn reload_if_due(&mut self, wiki: &dyn WikiApi) -> Result<Option<(ConfigMap, ConfigMap)>> {
        if self.cache.is_some()
            && self
                .loaded_at
                .is_some_and(|at| at.elapsed() < CONFIG_TTL)
        {
            return Ok(None);
        }
        let new = self.fetch(wiki)?;
        let old = self.cache.take().unwrap_or_default();
        self.cache = Some(new.clone());
        self.loaded_at = Some(Instant::now());
        Ok(Some((old, new)))
    }

    fn fetch(&self, wiki: &dyn WikiApi) -> Result<ConfigMap> {
        let Some(page_title) = self.page.as_deref() else {
            // No registered source behaves as an empty remote.
            return Ok(ConfigMap::new());
        };
        let page = wiki.get_page(page_title)?;
        if !page.exists {
            return Ok(ConfigMap::new());
        }
        parse_configuration(&page.text)
    }

    /// Fill in defaults for keys the remote page does not set.
    /// Existing keys always win. Requires a prior load.
    pub fn merge_defaults(&mut self, defaults: &ConfigMap) {
        if let Some(cache) = self.cache.as_mut() {
            for (key, value) in defaults {
                if !cache.contains_key(key) {
                    cache.insert(key.clone(), value.clone());
                }
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cache.is_some()
    }

    /// A single key from the loaded configuration.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.cache.as_ref()?.get(key)
    }

    /// The whole loaded configuration.
    pub fn map(&self) -> Option<&ConfigMap> {
        self.cache.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn with_cache(cache: ConfigMap) -> Self {
        Self {
            page: None,
            cache: Some(cache),
            loaded_at: Some(Instant::now()),
        }
    }
}

/// Parse a configuration page body: strip full-line `//` comments, then
/// require a JSON object. An effectively empty page is an empty map;
/// malformed JSON is a hard error.
pub fn parse_configuration(text: &str) -> Result<ConfigMap> {
    let stripped: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect();
    let stripped = stripped.join("\n");
    if stripped.trim().is_empty() {
        return Ok(ConfigMap::new());
    }
    let value: Value = serde_json::from_str(&stripped)
        .map_err(|e| ClerkError::Config(format!("malformed task configuration: {e}")))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ClerkError::Config(format!(
            "task configuration must be a JSON object, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
