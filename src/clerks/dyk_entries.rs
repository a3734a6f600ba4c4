//! Task 6: fill missing "did you know" blurbs on English Wikipedia talk
//! pages.
//!
//! A tracking category lists talk pages whose DYK template lacks its
//! blurb. The date on the template points at the monthly archive of
//! front-page entries; the matching line there is copied into the
//! template's `entry`/`dykentry` parameter. Pages whose blurb cannot be
//! found are appended to an on-wiki log, saved in batches.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::task::{ConfigMap, RunContext, Task, TaskLogic, TaskMeta};
use crate::wiki::api::{Page, SaveOptions, WikiApi};
use crate::wiki::text::{append_named_param, find_templates, list_entry_text};

const CONFIG_PAGE: &str = "User:WikiClerk/DYK options";

const DYK_TALK_TEMPLATES: [&str; 2] = ["Dyktalk", "DYK talk"];
const HISTORY_TEMPLATES: [&str; 2] = ["ArticleHistory", "Article history"];

/// Log batch size: one log save per this many newly logged pages.
const LOG_BATCH: usize = 25;

pub fn task() -> Task {
    Task::new(
        TaskMeta {
            number: 6,
            name: "DYK entry filler".to_owned(),
            site: "en".to_owned(),
            family: "wikipedia".to_owned(),
            continuous: false,
            supports_manual_run: true,
            configuration_page: Some(CONFIG_PAGE.to_owned()),
        },
        Arc::new(DykEntryClerk),
    )
}

fn defaults() -> ConfigMap {
    let mut map = ConfigMap::new();
    map.insert("missing_blurb_enable".to_owned(), json!(true));
    map.insert(
        "missing_blurb_edit_summary".to_owned(),
        json!("[[WP:Bots/Requests for approval/WikiClerk 6|Bot]]: Fill missing DYK blurb"),
    );
    map.insert(
        "missing_blurb_log_page".to_owned(),
        json!("User:WikiClerk/DYK blurb not found"),
    );
    map.insert(
        "missing_blurb_log_summary".to_owned(),
        json!(
            "[[WP:Bots/Requests for approval/WikiClerk 6|Bot]]: Update log for DYK blurbs that were not found"
        ),
    );
    map.insert(
        "archive_page_format".to_owned(),
        json!("Wikipedia:Recent additions/{year}/{month}"),
    );
    map.insert(
        "tracking_category".to_owned(),
        json!("Pages with a missing DYK entry"),
    );
    map.insert("page_limit".to_owned(), json!(100));
    map
}

/// Date a blurb appeared on the front page, as written on the template.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DykDate {
    year: String,
    month: String,
    day: String,
}

/// Template occurrences that want the blurb, with the parameter name
/// each kind uses.
#[derive(Debug, Clone)]
struct BlurbTarget {
    start: usize,
    end: usize,
    source: String,
    param: &'static str,
}

/// Date from a `{{DYK talk|5 June|2020}}` style template.
fn dyktalk_date(positional: &[&str]) -> Option<DykDate> {
    let date = positional.first()?;
    let year = positional.get(1)?;
    let (day, month) = split_day_month(date)?;
    Some(DykDate {
        year: (*year).to_owned(),
        month,
        day,
    })
}

/// Date from an `{{Article history|...|dykdate=5 June 2020}}` parameter.
fn history_date(raw: &str) -> Option<DykDate> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    match parts.as_slice() {
        [day, month, year] => Some(DykDate {
            year: (*year).to_owned(),
            month: (*month).to_owned(),
            day: (*day).to_owned(),
        }),
        _ => None,
    }
}

/// Split `"5 June"` into day and month, tolerating the swapped order
/// some templates carry.
fn split_day_month(date: &str) -> Option<(String, String)> {
    let mut parts = date.split_whitespace();
    let first = parts.next()?;
    let second = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let (mut day, mut month) = (first, second);
    if is_numeric(month) && !is_numeric(day) {
        std::mem::swap(&mut day, &mut month);
    }
    Some((day.to_owned(), month.to_owned()))
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

/// Whether the accumulated log entries are due for a save.
fn log_batch_full(pending: usize) -> bool {
    pending >= LOG_BATCH
}

/// Find the blurb date and every template slot the blurb should go into.
fn scan_talk_page(text: &str) -> (Option<DykDate>, Vec<BlurbTarget>) {
    let mut date = None;
    let mut targets = Vec::new();
    for template in find_templates(text) {
        let param = if template.name_matches(&DYK_TALK_TEMPLATES) {
            if date.is_none() {
                date = dyktalk_date(&template.positional());
            }
            "entry"
        } else if template.name_matches(&HISTORY_TEMPLATES) {
            if date.is_none() {
                date = template.get("dykdate").and_then(history_date);
            }
            "dykentry"
        } else {
            continue;
        };
        if template.get(param).is_none() {
            targets.push(BlurbTarget {
                start: template.start,
                end: template.end,
                source: template.source(text).to_owned(),
                param,
            });
        }
    }
    (date, targets)
}

/// The archive line mentioning the article, without its list marker.
fn find_blurb(archive_text: &str, article_title: &str) -> Option<String> {
    let needle = format!("'''[[{article_title}");
    for line in archive_text.lines() {
        if !line.contains(&needle) {
            continue;
        }
        let entry = list_entry_text(line).unwrap_or(line).trim();
        if !entry.is_empty() {
            return Some(entry.to_owned());
        }
    }
    None
}

/// Insert the blurb into every collected slot, back to front so earlier
/// spans stay valid.
fn apply_blurb(text: &str, targets: &[BlurbTarget], blurb: &str) -> String {
    let mut out = text.to_owned();
    for target in targets.iter().rev() {
        let updated = append_named_param(&target.source, target.param, blurb);
        out.replace_range(target.start..target.end, &updated);
    }
    out
}

/// Monthly archive pages, fetched once per (year, month) and kept for
/// the rest of the pass.
#[derive(Default)]
struct ArchiveCache {
    pages: HashMap<(String, String), String>,
}

impl ArchiveCache {
    fn text(
        &mut self,
        wiki: &dyn WikiApi,
        format: &str,
        year: &str,
        month: &str,
    ) -> Result<String> {
        let key = (year.to_owned(), month.to_owned());
        if let Some(text) = self.pages.get(&key) {
            return Ok(text.clone());
        }
        let title = format.replace("{year}", year).replace("{month}", month);
        let page = wiki.get_page(&title)?;
        if !page.exists {
            debug!(page = %title, "archive page does not exist");
        }
        self.pages.insert(key, page.text.clone());
        Ok(page.text)
    }
}

pub struct DykEntryClerk;

impl DykEntryClerk {
    /// Try to fill the blurb on one talk page. `Ok(true)` means the page
    /// needs no log entry (filled, declined or nothing to do there).
    fn fill_missing_blurb(
        task: &mut Task,
        ctx: &RunContext,
        archives: &mut ArchiveCache,
        archive_format: &str,
        summary: &str,
        article: &str,
        page: &Page,
    ) -> Result<bool> {
        let (date, targets) = scan_talk_page(&page.text);
        let Some(date) = date else {
            debug!(page = %page.title, "no usable DYK date");
            return Ok(false);
        };
        if targets.is_empty() {
            return Ok(true);
        }
        debug!(
            page = %page.title,
            year = %date.year,
            month = %date.month,
            day = %date.day,
            "looking up blurb"
        );

        let archive_text =
            archives.text(ctx.wiki.as_ref(), archive_format, &date.year, &date.month)?;
        let Some(blurb) = find_blurb(&archive_text, article) else {
            return Ok(false);
        };

        if !task.should_edit() {
            return Ok(true);
        }
        if task.manual_run() && !ctx.confirm(&format!("Fill DYK blurb on {}?", page.title)) {
            return Ok(true);
        }

        info!(page = %page.title, "filling DYK blurb");
        let updated = apply_blurb(&page.text, &targets, &blurb);
        ctx.wiki.save_page(
            &page.title,
            &updated,
            summary,
            &SaveOptions {
                minor: true,
                bot_flag: task.should_use_bot_flag(),
            },
        )?;
        task.record_trial_edit()?;
        Ok(true)
    }
}

impl TaskLogic for DykEntryClerk {
    fn default_configuration(&self) -> ConfigMap {
        defaults()
    }

    fn run(&self, task: &mut Task, ctx: &RunContext) -> Result<()> {
        let wiki = ctx.wiki.as_ref();
        task.merge_task_configuration(wiki, &defaults())?;
        if !task.config_bool(wiki, "missing_blurb_enable")? {
            info!("disabled in configuration");
            return Ok(());
        }
        let fill_summary = task.config_str(wiki, "missing_blurb_edit_summary")?;
        let log_title = task.config_str(wiki, "missing_blurb_log_page")?;
        let log_summary = task.config_str(wiki, "missing_blurb_log_summary")?;
        let archive_format = task.config_str(wiki, "archive_page_format")?;
        let category = task.config_str(wiki, "tracking_category")?;
        let limit = usize::try_from(task.config_i64(wiki, "page_limit")?).unwrap_or(0);

        let replica = ctx.replicas.open(&task.meta().dbname())?;
        if replica.is_lagged()? {
            warn!("replica is lagging, not processing");
            return Ok(());
        }
        let candidates = replica.talk_pages_in_category(&category, limit)?;
        info!(count = candidates.len(), "talk pages missing a blurb");

        let mut archives = ArchiveCache::default();
        let mut log_text = wiki.get_page(&log_title)?.text;
        let mut pending_log = 0usize;
        let log_options = SaveOptions {
            minor: true,
            bot_flag: task.should_use_bot_flag(),
        };

        for article in candidates {
            ctx.check_interrupt()?;
            if !task.should_edit() {
                info!("cannot edit anymore, stopping");
                break;
            }
            let title = format!("Talk:{article}");
            let page = wiki.get_page(&title)?;
            if !page.exists {
                debug!(page = %title, "talk page disappeared since replica sync");
                continue;
            }

            let handled = Self::fill_missing_blurb(
                task,
                ctx,
                &mut archives,
                &archive_format,
                &fill_summary,
                &article,
                &page,
            )?;
            if handled {
                continue;
            }

            // Blurb not found: log the page once, in batches.
            if log_text.contains(&title) {
                continue;
            }
            log_text.push_str(&format!("\n* [[{title}]]. Checked ~~~~~"));
            pending_log += 1;
            if log_batch_full(pending_log) {
                wiki.save_page(&log_title, &log_text, &log_summary, &log_options)?;
                pending_log = 0;
            }
        }

        if pending_log > 0 {
            wiki.save_page(&log_title, &log_text, &log_summary, &log_options)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
