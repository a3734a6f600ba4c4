//! The [`WikiApi`] contract consumed by tasks and the CLI.
//!
//! Tasks never talk HTTP directly; they hold an `Arc<dyn WikiApi>` handed
//! out by the [`crate::wiki::pool::WikiPool`]. Tests substitute stub
//! implementations.

use chrono::{DateTime, Utc};

use crate::error::Result;

/// A fetched page.
#[derive(Debug, Clone)]
pub struct Page {
    pub title: String,
    pub text: String,
    pub exists: bool,
    /// Numeric page id; `None` for missing pages. Used to verify that a
    /// replica row still names the same page.
    pub id: Option<i64>,
}

/// One revision of a page, newest-first ordering in listings.
#[derive(Debug, Clone)]
pub struct Revision {
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub user: Option<String>,
}

/// Block-relevant slice of a user's state.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub name: String,
    pub blocked: bool,
    pub blocked_by: Option<String>,
    pub block_reason: Option<String>,
}

/// A single abuse-filter log hit.
#[derive(Debug, Clone)]
pub struct AbuseFilterHit {
    /// Page the edit was attempted on.
    pub title: String,
    /// Filter that matched; `None` when the log hides it.
    pub filter_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Options for a page save.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub minor: bool,
    /// Mark the edit with the bot flag. Tasks derive this from
    /// `Task::should_use_bot_flag`.
    pub bot_flag: bool,
}

/// One event from the recent-changes feed, already filtered to the
/// subscribed page.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub title: String,
    pub wiki: String,
    pub user: String,
    pub comment: String,
}

/// Outcome of asking a wiki for a change stream.
///
/// The fallback is part of the type: callers that get `Unsupported` do a
/// single pass instead of waiting on events, with no guessing from error
/// values.
pub enum StreamSubscription {
    Subscribed(Box<dyn Iterator<Item = ChangeEvent> + Send>),
    Unsupported,
}

/// Read/write access to one wiki.
///
/// Implementations are shared between tasks via `Arc`, so everything here
/// takes `&self`.
pub trait WikiApi: Send + Sync {
    /// Logged-in username (or the anonymous placeholder).
    fn username(&self) -> Result<String>;

    /// Fetch a page. Missing pages come back with `exists = false` and
    /// empty text rather than as errors.
    fn get_page(&self, title: &str) -> Result<Page>;

    /// Latest revisions of a page, newest first, at most `limit`.
    fn page_revisions(&self, title: &str, limit: usize) -> Result<Vec<Revision>>;

    /// Save new page text. The caller is responsible for having checked
    /// its edit authorization first.
    fn save_page(&self, title: &str, text: &str, summary: &str, options: &SaveOptions)
    -> Result<()>;

    /// Subscribe to change events for one page.
    fn change_stream(&self, title: &str) -> Result<StreamSubscription>;

    /// Block state of a user.
    fn user_info(&self, username: &str) -> Result<UserInfo>;

    /// The most recent abuse-filter hit for a user, if any.
    fn last_abuse_filter_hit(&self, username: &str) -> Result<Option<AbuseFilterHit>>;

    /// Whether an abuse filter is hidden from public view.
    fn is_filter_private(&self, filter_id: i64) -> Result<bool>;

    /// Wikidata item id linked to an article, if one exists.
    fn wikidata_id(&self, title: &str) -> Result<Option<String>>;

    /// Raw `action=query` escape hatch for list modules the typed surface
    /// does not cover (allusers, logevents, globalblocks). Returns the
    /// `query` object of the response.
    fn api_query(&self, params: &[(&str, &str)]) -> Result<serde_json::Value>;
}

/// Parse the ISO-8601 timestamps the Action API emits.
pub(crate) fn parse_api_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
