//! Shared test doubles for the integration suite.
//!
//! `FakeWiki` is an in-memory wiki: tests seed pages and revision
//! histories, saves are recorded and written through so a later pass
//! reads the clerked text. `FakeReplicas` answers replica queries from
//! canned data.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use wikiclerk::error::{ClerkError, Result};
use wikiclerk::store::TaskStore;
use wikiclerk::store::replica::{ReplicaFactory, ReplicaPage, ReplicaStore};
use wikiclerk::wiki::api::{
    AbuseFilterHit, Page, Revision, SaveOptions, StreamSubscription, UserInfo, WikiApi,
};

/// One recorded `save_page` call.
#[derive(Debug, Clone)]
pub(crate) struct SavedEdit {
    pub(crate) title: String,
    pub(crate) text: String,
    pub(crate) summary: String,
    pub(crate) minor: bool,
    pub(crate) bot_flag: bool,
}

#[derive(Default)]
struct WikiState {
    pages: HashMap<String, String>,
    revisions: HashMap<String, Vec<Revision>>,
    users: HashMap<String, UserInfo>,
    saves: Vec<SavedEdit>,
    reads: HashMap<String, usize>,
}

/// In-memory [`WikiApi`] with write-through saves.
#[derive(Default)]
pub(crate) struct FakeWiki {
    state: Mutex<WikiState>,
}

impl FakeWiki {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_page(&self, title: &str, text: &str) {
        let mut state = self.state.lock().unwrap();
        state.pages.insert(title.to_owned(), text.to_owned());
    }

    /// Seed the revision history served by `page_revisions`, newest first.
    pub(crate) fn set_revisions(&self, title: &str, revisions: Vec<Revision>) {
        let mut state = self.state.lock().unwrap();
        state.revisions.insert(title.to_owned(), revisions);
    }

    pub(crate) fn set_user(&self, info: UserInfo) {
        let mut state = self.state.lock().unwrap();
        state.users.insert(info.name.clone(), info);
    }

    pub(crate) fn saves(&self) -> Vec<SavedEdit> {
        self.state.lock().unwrap().saves.clone()
    }

    /// How many times `get_page` was asked for `title`.
    pub(crate) fn reads_of(&self, title: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .reads
            .get(title)
            .copied()
            .unwrap_or(0)
    }
}

impl WikiApi for FakeWiki {
    fn username(&self) -> Result<String> {
        Ok("WikiClerk".to_owned())
    }

    fn get_page(&self, title: &str) -> Result<Page> {
        let mut state = self.state.lock().unwrap();
        *state.reads.entry(title.to_owned()).or_insert(0) += 1;
        match state.pages.get(title) {
            Some(text) => Ok(Page {
                title: title.to_owned(),
                text: text.clone(),
                exists: true,
                id: Some(1),
            }),
            None => Ok(Page {
                title: title.to_owned(),
                text: String::new(),
                exists: false,
                id: None,
            }),
        }
    }

    fn page_revisions(&self, title: &str, limit: usize) -> Result<Vec<Revision>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .revisions
            .get(title)
            .map(|revs| revs.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn save_page(
        &self,
        title: &str,
        text: &str,
        summary: &str,
        options: &SaveOptions,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.saves.push(SavedEdit {
            title: title.to_owned(),
            text: text.to_owned(),
            summary: summary.to_owned(),
            minor: options.minor,
            bot_flag: options.bot_flag,
        });
        state.pages.insert(title.to_owned(), text.to_owned());
        Ok(())
    }

    fn change_stream(&self, _title: &str) -> Result<StreamSubscription> {
        Ok(StreamSubscription::Unsupported)
    }

    fn user_info(&self, username: &str) -> Result<UserInfo> {
        let state = self.state.lock().unwrap();
        Ok(state.users.get(username).cloned().unwrap_or(UserInfo {
            name: username.to_owned(),
            blocked: false,
            blocked_by: None,
            block_reason: None,
        }))
    }

    fn last_abuse_filter_hit(&self, _username: &str) -> Result<Option<AbuseFilterHit>> {
        Ok(None)
    }

    fn is_filter_private(&self, _filter_id: i64) -> Result<bool> {
        Ok(false)
    }

    fn wikidata_id(&self, _title: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn api_query(&self, _params: &[(&str, &str)]) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }
}

struct FakeReplica {
    lag: f64,
    articles: Vec<String>,
}

impl ReplicaStore for FakeReplica {
    fn replication_lag(&self) -> Result<f64> {
        Ok(self.lag)
    }

    fn existing_articles(&self, titles: &[String]) -> Result<Vec<String>> {
        Ok(titles
            .iter()
            .filter(|t| self.articles.contains(t))
            .cloned()
            .collect())
    }

    fn large_untagged_talk_pages(
        &self,
        _min_len: i64,
        _skip_templates: &[String],
        _limit: usize,
    ) -> Result<Vec<ReplicaPage>> {
        Ok(Vec::new())
    }

    fn talk_pages_in_category(&self, _category: &str, _limit: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Factory serving the same canned replica for every wiki.
pub(crate) struct FakeReplicas {
    lag: f64,
    articles: Vec<String>,
}

impl FakeReplicas {
    /// Up-to-date mirror where exactly `articles` exist.
    pub(crate) fn with_articles(articles: &[&str]) -> Self {
        Self {
            lag: 0.0,
            articles: articles.iter().map(|a| (*a).to_owned()).collect(),
        }
    }

    /// Mirror that is `lag` seconds behind.
    pub(crate) fn lagged(lag: f64) -> Self {
        Self {
            lag,
            articles: Vec::new(),
        }
    }
}

impl ReplicaFactory for FakeReplicas {
    fn open(&self, _dbname: &str) -> Result<Box<dyn ReplicaStore>> {
        Ok(Box::new(FakeReplica {
            lag: self.lag,
            articles: self.articles.clone(),
        }))
    }
}

/// Factory for tasks that must not touch replicas at all.
pub(crate) struct NoReplicas;

impl ReplicaFactory for NoReplicas {
    fn open(&self, dbname: &str) -> Result<Box<dyn ReplicaStore>> {
        Err(ClerkError::Replica(format!("no mirror for {dbname}")))
    }
}

pub(crate) fn open_store() -> (tempfile::TempDir, Arc<TaskStore>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = TaskStore::open(&dir.path().join("clerk.db")).expect("store");
    (dir, Arc::new(store))
}

/// Approve a task before its first activation. The placeholder name is
/// replaced when the real task registers itself.
pub(crate) fn approve(store: &TaskStore, task_id: u32) {
    store
        .register_task(task_id, "pending approval")
        .expect("register");
    store.set_approved(task_id, true).expect("approve");
}
