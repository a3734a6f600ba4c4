//! Task 3: rebuild the bot account status table on the English
//! Wikipedia.
//!
//! For every account in the `bot` group, one compound query fetches its
//! last edit, last logged action, edit count, extra groups and block
//! state. The rows render into a sortable wikitable that is saved only
//! when it differs from what is already on the status page. Accounts
//! whose data cannot be loaded are logged and skipped, so one broken
//! account never loses the whole report.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::delay::Delay;
use crate::error::{ClerkError, Result};
use crate::task::{ConfigMap, RunContext, Task, TaskLogic, TaskMeta};
use crate::wiki::api::{SaveOptions, WikiApi, parse_api_timestamp};

/// Groups every bot has; only the rest are worth a table column.
const STANDARD_GROUPS: [&str; 5] = ["bot", "*", "user", "autoconfirmed", "extendedconfirmed"];

const SORT_KEY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const DISPLAY_FORMAT: &str = "%d&nbsp;%b&nbsp;%Y&nbsp;%H:%M:%S&nbsp;(UTC)";

const TABLE_HEADER: &str = "{| class=\"wikitable sortable\"\n\
|-\n\
! Bot account\n\
! Last activity\n\
! Last edit\n\
! Last logged action\n\
! Total edits\n\
! Groups\n\
! Block\n";

pub fn task() -> Task {
    Task::new(
        TaskMeta {
            number: 3,
            name: "Bot status report".to_owned(),
            site: "en".to_owned(),
            family: "wikipedia".to_owned(),
            continuous: false,
            supports_manual_run: false,
            configuration_page: None,
        },
        Arc::new(BotStatusClerk),
    )
}

fn defaults() -> ConfigMap {
    let mut map = ConfigMap::new();
    map.insert("run".to_owned(), json!(true));
    map.insert("status_page".to_owned(), json!("User:WikiClerk/Bot status report"));
    map.insert("edit_summary".to_owned(), json!("Bot: update bot status report"));
    map.insert("query_delay_ms".to_owned(), json!(500));
    map
}

/// Everything the table shows about one bot account.
#[derive(Debug, Clone)]
struct BotStatus {
    name: String,
    last_edit: Option<DateTime<Utc>>,
    last_log: Option<DateTime<Utc>>,
    edit_count: i64,
    extra_groups: Vec<String>,
    block: Option<BlockInfo>,
}

#[derive(Debug, Clone)]
struct BlockInfo {
    by: String,
    at: String,
    expiry: String,
    reason: String,
    partial: bool,
}

impl BotStatus {
    fn last_activity(&self) -> Option<DateTime<Utc>> {
        match (self.last_edit, self.last_log) {
            (Some(edit), Some(log)) => Some(edit.max(log)),
            (edit, log) => edit.or(log),
        }
    }

    fn to_table_row(&self) -> String {
        format!(
            "|-\n| {{{{no ping|{}}}}}\n| {}\n| {}\n| {}\n| data-sort-value={} | {}\n| {}\n| {}\n",
            self.name,
            format_date_cell(self.last_activity()),
            format_date_cell(self.last_edit),
            format_date_cell(self.last_log),
            self.edit_count,
            group_thousands(self.edit_count),
            self.extra_groups.join(", "),
            self.block.as_ref().map(BlockInfo::render).unwrap_or_default(),
        )
    }
}

impl BlockInfo {
    fn render(&self) -> String {
        format!(
            "{} by {{{{no ping|{}}}}} on {} with expiry at {}.<br/>Block reason is {}",
            if self.partial { "Partially blocked" } else { "Blocked" },
            self.by,
            self.at,
            self.expiry,
            escape_block_reason(&self.reason),
        )
    }
}

/// Defuse markup in operator-written block reasons so it cannot break
/// the table or drop the report into hidden categories.
fn escape_block_reason(reason: &str) -> String {
    reason
        .replace("[[Category:", "[[:Category:")
        .replace("[[category:", "[[:category:")
        .replace('{', "&#123;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn format_date_cell(date: Option<DateTime<Utc>>) -> String {
    match date {
        Some(date) => format!(
            "data-sort-value={} | {}",
            date.format(SORT_KEY_FORMAT),
            date.format(DISPLAY_FORMAT)
        ),
        None => "-".to_owned(),
    }
}

fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if value < 0 { format!("-{out}") } else { out }
}

fn render_status_table(rows: &[BotStatus]) -> String {
    let mut out = String::from(TABLE_HEADER);
    for row in rows {
        out.push_str(&row.to_table_row());
    }
    out.push_str("|}");
    out
}

/// Pull one account's status out of a compound
/// `users|usercontribs|logevents` query result.
fn parse_bot_status(query: &Value, username: &str) -> Result<BotStatus> {
    let Some(user) = query.get("users").and_then(|users| users.get(0)) else {
        return Err(ClerkError::Http(format!(
            "no user data in response for {username}"
        )));
    };

    let block = user.get("blockid").map(|_| BlockInfo {
        by: text_field(user, "blockedby"),
        at: text_field(user, "blockedtimestamp"),
        expiry: text_field(user, "blockexpiry"),
        reason: text_field(user, "blockreason"),
        partial: user
            .get("blockpartial")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    });

    let extra_groups = user
        .get("groups")
        .and_then(Value::as_array)
        .map(|groups| {
            groups
                .iter()
                .filter_map(Value::as_str)
                .filter(|group| !STANDARD_GROUPS.contains(group))
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Ok(BotStatus {
        name: user
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(username)
            .to_owned(),
        last_edit: first_timestamp(query, "usercontribs"),
        last_log: first_timestamp(query, "logevents"),
        edit_count: user.get("editcount").and_then(Value::as_i64).unwrap_or(0),
        extra_groups,
        block,
    })
}

fn text_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_owned()
}

fn first_timestamp(query: &Value, list: &str) -> Option<DateTime<Utc>> {
    query
        .get(list)?
        .get(0)?
        .get("timestamp")?
        .as_str()
        .and_then(parse_api_timestamp)
}

fn fetch_bot_status(wiki: &dyn WikiApi, username: &str) -> Result<BotStatus> {
    let query = wiki.api_query(&[
        ("list", "users|usercontribs|logevents"),
        ("ususers", username),
        ("usprop", "blockinfo|groups|editcount"),
        ("ucuser", username),
        ("uclimit", "1"),
        ("ucdir", "older"),
        ("ucprop", "timestamp"),
        ("leuser", username),
        ("lelimit", "1"),
        ("ledir", "older"),
    ])?;
    parse_bot_status(&query, username)
}

fn list_bot_accounts(wiki: &dyn WikiApi) -> Result<Vec<String>> {
    let query = wiki.api_query(&[("list", "allusers"), ("augroup", "bot"), ("aulimit", "max")])?;
    let Some(users) = query.get("allusers").and_then(Value::as_array) else {
        return Err(ClerkError::Http(
            "allusers listing missing from response".to_owned(),
        ));
    };
    Ok(users
        .iter()
        .filter_map(|user| user.get("name").and_then(Value::as_str).map(str::to_owned))
        .collect())
}

pub struct BotStatusClerk;

impl TaskLogic for BotStatusClerk {
    fn default_configuration(&self) -> ConfigMap {
        defaults()
    }

    fn run(&self, task: &mut Task, ctx: &RunContext) -> Result<()> {
        let wiki = ctx.wiki.as_ref();
        task.merge_task_configuration(wiki, &defaults())?;
        if !task.config_bool(wiki, "run")? {
            info!("disabled in configuration");
            return Ok(());
        }
        let status_page = task.config_str(wiki, "status_page")?;
        let summary = task.config_str(wiki, "edit_summary")?;
        let delay_ms = u64::try_from(task.config_i64(wiki, "query_delay_ms")?).unwrap_or(0);

        let accounts = list_bot_accounts(wiki)?;
        info!(count = accounts.len(), "loading bot account data");

        let mut rows = Vec::with_capacity(accounts.len());
        for username in &accounts {
            ctx.check_interrupt()?;
            let pacing = Delay::new(StdDuration::from_millis(delay_ms));
            match fetch_bot_status(wiki, username) {
                Ok(status) => {
                    debug!(bot = %username, "loaded status");
                    rows.push(status);
                }
                Err(err) => warn!(bot = %username, error = %err, "skipping account"),
            }
            pacing.wait();
        }

        let table = render_status_table(&rows);
        let page = wiki.get_page(&status_page)?;
        if page.exists && page.text.trim() == table.trim() {
            info!("status table unchanged, not saving");
            return Ok(());
        }
        if !task.should_edit() {
            info!("not authorized to edit");
            return Ok(());
        }

        info!(page = %status_page, bots = rows.len(), "saving status table");
        wiki.save_page(
            &status_page,
            &table,
            &summary,
            &SaveOptions {
                minor: false,
                bot_flag: task.should_use_bot_flag(),
            },
        )?;
        task.record_trial_edit()?;
        Ok(())
    }
}
