//! Shared wiki client pool keyed by `(site, family)`.
//!
//! The pool is owned by the orchestration layer and handed to whoever
//! needs a client; nothing in the crate holds a process-global wiki
//! handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{ClerkError, Result};
use crate::settings::WikiSettings;
use crate::wiki::api::WikiApi;
use crate::wiki::http::{Credentials, HttpWiki, HttpWikiConfig};

/// Lazily-built cache of one [`HttpWiki`] per wiki.
pub struct WikiPool {
    settings: WikiSettings,
    clients: Mutex<HashMap<(String, String), Arc<dyn WikiApi>>>,
}

impl WikiPool {
    pub fn new(settings: WikiSettings) -> Self {
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Client for the settings-default wiki (used by `whoami`).
    pub fn default_wiki(&self) -> Result<Arc<dyn WikiApi>> {
        let site = self.settings.default_site.clone();
        let family = self.settings.default_family.clone();
        self.get(&site, &family)
    }

    /// Client for one wiki, building it on first use.
    pub fn get(&self, site: &str, family: &str) -> Result<Arc<dyn WikiApi>> {
        let key = (site.to_owned(), family.to_owned());
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| ClerkError::Lock("wiki pool".to_owned()))?;
        if let Some(client) = clients.get(&key) {
            return Ok(Arc::clone(client));
        }

        let credentials = match (&self.settings.username, &self.settings.bot_password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        let stream_url = match self.settings.stream_url.trim() {
            "" => None,
            url => Some(url.to_owned()),
        };
        let client: Arc<dyn WikiApi> = Arc::new(HttpWiki::new(HttpWikiConfig {
            api_url: self.api_url(site, family),
            stream_url,
            dbname: dbname(site),
            user_agent: self.settings.user_agent.clone(),
            credentials,
        }));
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    fn api_url(&self, site: &str, family: &str) -> String {
        if let Some(url) = self.settings.api_url_overrides.get(&format!("{site}.{family}")) {
            return url.clone();
        }
        // Meta and friends live under wikimedia.org, not a family domain.
        if family == "meta" || family == "wikimedia" {
            return format!("https://{site}.wikimedia.org/w/api.php");
        }
        self.settings
            .api_url_template
            .replace("{site}", site)
            .replace("{family}", family)
    }
}

/// Database name of a wiki (`en` -> `enwiki`, `meta` -> `metawiki`).
pub fn dbname(site: &str) -> String {
    format!("{site}wiki")
}
