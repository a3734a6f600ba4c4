//! Blocking MediaWiki Action API client over `ureq`.
//!
//! One [`HttpWiki`] per wiki, shared through `Arc<dyn WikiApi>`. Login is
//! lazy: read paths work anonymously, the first save triggers the
//! bot-password login and CSRF token fetch. A save that fails with
//! `badtoken` refreshes the token and retries exactly once.

use std::io::BufReader;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ClerkError, Result};
use crate::wiki::api::{
    AbuseFilterHit, Page, Revision, SaveOptions, StreamSubscription, UserInfo, WikiApi,
    parse_api_timestamp,
};
use crate::wiki::stream::ChangeStream;

/// Total per-request timeout for API calls. Stream requests stay open
/// indefinitely and do not use it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bot-password credentials from Special:BotPasswords.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Connection details for one wiki.
#[derive(Debug, Clone)]
pub struct HttpWikiConfig {
    /// Full `api.php` URL.
    pub api_url: String,
    /// EventStreams feed URL; `None` means change streams are unsupported.
    pub stream_url: Option<String>,
    /// Database name (`enwiki`, `fiwiki`, ...) used to filter stream events.
    pub dbname: String,
    pub user_agent: String,
    pub credentials: Option<Credentials>,
}

#[derive(Default)]
struct Session {
    logged_in: bool,
    csrf_token: Option<String>,
}

/// Action API client for a single wiki.
pub struct HttpWiki {
    config: HttpWikiConfig,
    agent: ureq::Agent,
    session: Mutex<Session>,
}

impl HttpWiki {
    pub fn new(config: HttpWikiConfig) -> Self {
        let agent = ureq::builder().user_agent(&config.user_agent).build();
        Self {
            config,
            agent,
            session: Mutex::new(Session::default()),
        }
    }

    /// GET an `action=query`-style call and return the parsed body after
    /// API-level error checking.
    fn get_json(&self, params: &[(&str, &str)]) -> Result<Value> {
        let mut request = self
            .agent
            .get(&self.config.api_url)
            .timeout(REQUEST_TIMEOUT)
            .query("format", "json")
            .query("formatversion", "2");
        for (key, value) in params {
            request = request.query(key, value);
        }
        let response = request
            .call()
            .map_err(|e| ClerkError::Http(e.to_string()))?;
        let body: Value = response
            .into_json()
            .map_err(|e| ClerkError::Http(e.to_string()))?;
        check_api_error(&body)?;
        Ok(body)
    }

    /// POST a form-encoded action call.
    fn post_form(&self, params: &[(&str, &str)]) -> Result<Value> {
        let mut form: Vec<(&str, &str)> = vec![("format", "json"), ("formatversion", "2")];
        form.extend_from_slice(params);
        let response = self
            .agent
            .post(&self.config.api_url)
            .timeout(REQUEST_TIMEOUT)
            .send_form(&form)
            .map_err(|e| ClerkError::Http(e.to_string()))?;
        let body: Value = response
            .into_json()
            .map_err(|e| ClerkError::Http(e.to_string()))?;
        Ok(body)
    }

    /// Log in with the configured bot password if not already done.
    ///
    /// Anonymous clients pass through; the server rejects their writes
    /// and that rejection surfaces as an API error on save.
    fn ensure_login(&self) -> Result<()> {
        let Some(credentials) = self.config.credentials.clone() else {
            return Ok(());
        };
        {
            let session = self.lock_session()?;
            if session.logged_in {
                return Ok(());
            }
        }

        let body = self.get_json(&[("action", "query"), ("meta", "tokens"), ("type", "login")])?;
        let token = body["query"]["tokens"]["logintoken"]
            .as_str()
            .ok_or_else(|| ClerkError::Http("login token missing from response".to_owned()))?
            .to_owned();

        let body = self.post_form(&[
            ("action", "login"),
            ("lgname", &credentials.username),
            ("lgpassword", &credentials.password),
            ("lgtoken", &token),
        ])?;
        check_api_error(&body)?;
        let result = body["login"]["result"].as_str().unwrap_or("");
        if result != "Success" {
            return Err(ClerkError::Api {
                code: "login-failed".to_owned(),
                info: format!("login result {result:?} for {}", credentials.username),
            });
        }

        debug!(username = %credentials.username, "logged in");
        self.lock_session()?.logged_in = true;
        Ok(())
    }

    fn csrf_token(&self) -> Result<String> {
        if let Some(token) = self.lock_session()?.csrf_token.clone() {
            return Ok(token);
        }
        let body = self.get_json(&[("action", "query"), ("meta", "tokens")])?;
        let token = body["query"]["tokens"]["csrftoken"]
            .as_str()
            .ok_or_else(|| ClerkError::Http("csrf token missing from response".to_owned()))?
            .to_owned();
        self.lock_session()?.csrf_token = Some(token.clone());
        Ok(token)
    }

    fn invalidate_csrf_token(&self) -> Result<()> {
        self.lock_session()?.csrf_token = None;
        Ok(())
    }

    fn lock_session(&self) -> Result<std::sync::MutexGuard<'_, Session>> {
        self.session
            .lock()
            .map_err(|_| ClerkError::Lock("wiki session".to_owned()))
    }

    fn try_save(
        &self,
        title: &str,
        text: &str,
        summary: &str,
        options: &SaveOptions,
        token: &str,
    ) -> Result<Value> {
        let mut form: Vec<(&str, &str)> = vec![
            ("action", "edit"),
            ("title", title),
            ("text", text),
            ("summary", summary),
            ("token", token),
        ];
        if options.bot_flag {
            form.push(("bot", "1"));
        }
        if options.minor {
            form.push(("minor", "1"));
        }
        self.post_form(&form)
    }
}

impl WikiApi for HttpWiki {
    fn username(&self) -> Result<String> {
        self.ensure_login()?;
        let body = self.get_json(&[("action", "query"), ("meta", "userinfo")])?;
        body["query"]["userinfo"]["name"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| ClerkError::Http("userinfo missing from response".to_owned()))
    }

    fn get_page(&self, title: &str) -> Result<Page> {
        let body = self.get_json(&[
            ("action", "query"),
            ("prop", "revisions"),
            ("rvprop", "content"),
            ("rvslots", "main"),
            ("titles", title),
        ])?;
        let page = &body["query"]["pages"][0];
        let exists = page.get("missing").is_none();
        let text = page["revisions"][0]["slots"]["main"]["content"]
            .as_str()
            .unwrap_or("")
            .to_owned();
        Ok(Page {
            title: page["title"].as_str().unwrap_or(title).to_owned(),
            text,
            exists,
            id: page["pageid"].as_i64(),
        })
    }

    fn page_revisions(&self, title: &str, limit: usize) -> Result<Vec<Revision>> {
        let limit_str = limit.to_string();
        let body = self.get_json(&[
            ("action", "query"),
            ("prop", "revisions"),
            ("rvprop", "content|timestamp|user"),
            ("rvslots", "main"),
            ("rvlimit", &limit_str),
            ("titles", title),
        ])?;
        let Some(revisions) = body["query"]["pages"][0]["revisions"].as_array() else {
            return Ok(Vec::new());
        };
        Ok(revisions
            .iter()
            .map(|rev| Revision {
                text: rev["slots"]["main"]["content"]
                    .as_str()
                    .unwrap_or("")
                    .to_owned(),
                timestamp: rev["timestamp"].as_str().and_then(parse_api_timestamp),
                user: rev["user"].as_str().map(str::to_owned),
            })
            .collect())
    }

    fn save_page(
        &self,
        title: &str,
        text: &str,
        summary: &str,
        options: &SaveOptions,
    ) -> Result<()> {
        self.ensure_login()?;
        let token = self.csrf_token()?;
        let mut body = self.try_save(title, text, summary, options, &token)?;

        if api_error_code(&body) == Some("badtoken") {
            warn!(title, "stale csrf token, refetching once");
            self.invalidate_csrf_token()?;
            let token = self.csrf_token()?;
            body = self.try_save(title, text, summary, options, &token)?;
        }
        check_api_error(&body)?;

        let result = body["edit"]["result"].as_str().unwrap_or("");
        if result != "Success" {
            return Err(ClerkError::Api {
                code: "edit-failed".to_owned(),
                info: format!("edit result {result:?} for [[{title}]]"),
            });
        }
        debug!(title, summary, "saved page");
        Ok(())
    }

    fn change_stream(&self, title: &str) -> Result<StreamSubscription> {
        let Some(stream_url) = self.config.stream_url.as_deref() else {
            return Ok(StreamSubscription::Unsupported);
        };
        let response = self
            .agent
            .get(stream_url)
            .set("Accept", "text/event-stream")
            .call()
            .map_err(|e| ClerkError::Stream(e.to_string()))?;
        let reader = BufReader::new(response.into_reader());
        let stream = ChangeStream::new(reader, title.to_owned(), self.config.dbname.clone());
        Ok(StreamSubscription::Subscribed(Box::new(stream)))
    }

    fn user_info(&self, username: &str) -> Result<UserInfo> {
        let body = self.get_json(&[
            ("action", "query"),
            ("list", "users"),
            ("ususers", username),
            ("usprop", "blockinfo"),
        ])?;
        let user = &body["query"]["users"][0];
        Ok(UserInfo {
            name: user["name"].as_str().unwrap_or(username).to_owned(),
            blocked: user.get("blockid").is_some(),
            blocked_by: user["blockedby"].as_str().map(str::to_owned),
            block_reason: user["blockreason"].as_str().map(str::to_owned),
        })
    }

    fn last_abuse_filter_hit(&self, username: &str) -> Result<Option<AbuseFilterHit>> {
        let body = self.get_json(&[
            ("action", "query"),
            ("list", "abuselog"),
            ("afluser", username),
            ("afllimit", "1"),
            ("aflprop", "ids|title|timestamp|filter"),
        ])?;
        let Some(entry) = body["query"]["abuselog"].as_array().and_then(|l| l.first()) else {
            return Ok(None);
        };
        let Some(timestamp) = entry["timestamp"].as_str().and_then(parse_api_timestamp) else {
            return Ok(None);
        };
        Ok(Some(AbuseFilterHit {
            title: entry["title"].as_str().unwrap_or("").to_owned(),
            filter_id: entry["filter_id"].as_i64(),
            timestamp,
        }))
    }

    fn is_filter_private(&self, filter_id: i64) -> Result<bool> {
        let id = filter_id.to_string();
        let body = self.get_json(&[
            ("action", "query"),
            ("list", "abusefilters"),
            ("abfstartid", &id),
            ("abfendid", &id),
            ("abfprop", "id|private"),
        ])?;
        let Some(filter) = body["query"]["abusefilters"]
            .as_array()
            .and_then(|l| l.first())
        else {
            // A filter the log names but the list hides is private.
            return Ok(true);
        };
        Ok(filter
            .get("private")
            .map(|v| v.as_bool().unwrap_or(true))
            .unwrap_or(false))
    }

    fn wikidata_id(&self, title: &str) -> Result<Option<String>> {
        let body = self.get_json(&[
            ("action", "query"),
            ("prop", "pageprops"),
            ("ppprop", "wikibase_item"),
            ("titles", title),
        ])?;
        Ok(body["query"]["pages"][0]["pageprops"]["wikibase_item"]
            .as_str()
            .map(str::to_owned))
    }

    fn api_query(&self, params: &[(&str, &str)]) -> Result<Value> {
        let mut full: Vec<(&str, &str)> = vec![("action", "query")];
        full.extend_from_slice(params);
        let body = self.get_json(&full)?;
        Ok(body.get("query").cloned().unwrap_or(Value::Null))
    }
}

fn api_error_code(body: &Value) -> Option<&str> {
    body.get("error")?.get("code")?.as_str()
}

/// Map an API-level `error` payload to [`ClerkError::Api`].
fn check_api_error(body: &Value) -> Result<()> {
    if let Some(error) = body.get("error") {
        return Err(ClerkError::Api {
            code: error["code"].as_str().unwrap_or("unknown").to_owned(),
            info: error["info"].as_str().unwrap_or("").to_owned(),
        });
    }
    Ok(())
}
