//! Task 5: close out handled global lock and block requests on Meta.
//!
//! Each level-3 section on the steward request page names accounts (lock
//! templates) and IP ranges (block templates). When every target in a
//! section was already locked or blocked long enough ago, the section's
//! empty status template is set to `alreadydone` and one clerk note
//! credits the stewards who did the work. Sections with any unhandled or
//! freshly handled target are left for a later pass.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::task::{ConfigMap, RunContext, Task, TaskLogic, TaskMeta};
use crate::wiki::api::{SaveOptions, WikiApi, parse_api_timestamp};
use crate::wiki::text::{Section, find_templates, split_sections};

const CONFIG_PAGE: &str = "User:WikiClerk/Steward request clerk configuration";

const STATUS_TEMPLATES: [&str; 1] = ["status"];
const LOCK_TEMPLATES: [&str; 2] = ["LockHide", "MultiLock"];
const BLOCK_TEMPLATES: [&str; 1] = ["Luxotool"];

pub fn task() -> Task {
    Task::new(
        TaskMeta {
            number: 5,
            name: "Steward request clerk".to_owned(),
            site: "meta".to_owned(),
            family: "meta".to_owned(),
            continuous: false,
            supports_manual_run: true,
            configuration_page: Some(CONFIG_PAGE.to_owned()),
        },
        Arc::new(StewardRequestClerk),
    )
}

fn defaults() -> ConfigMap {
    let mut map = ConfigMap::new();
    map.insert("run".to_owned(), json!(true));
    map.insert("page".to_owned(), json!("Steward requests/Global"));
    map.insert("time_min".to_owned(), json!(300));
    map
}

/// Targets collected from one open request section.
#[derive(Debug, Default, PartialEq, Eq)]
struct SectionTargets {
    accounts: Vec<String>,
    ips: Vec<String>,
}

/// Who handled one target, and when.
struct HandledBy {
    steward: String,
    at: DateTime<Utc>,
}

/// Collect lock/block targets from a section, or `None` when the section
/// has no status template or its status is already set.
fn scan_section(text: &str) -> Option<SectionTargets> {
    let templates = find_templates(text);
    let status = templates.iter().find(|t| t.name_matches(&STATUS_TEMPLATES))?;
    if status.first_positional().is_some() {
        return None;
    }

    let mut targets = SectionTargets::default();
    for template in &templates {
        if template.name_matches(&LOCK_TEMPLATES) {
            targets
                .accounts
                .extend(template.positional().into_iter().map(str::to_owned));
        } else if template.name_matches(&BLOCK_TEMPLATES) {
            targets
                .ips
                .extend(template.positional().into_iter().map(str::to_owned));
        }
    }
    Some(targets)
}

fn steward_who_blocked(wiki: &dyn WikiApi, ip: &str) -> Result<Option<HandledBy>> {
    let query = wiki.api_query(&[("list", "globalblocks"), ("bgip", ip)])?;
    Ok(query
        .get("globalblocks")
        .and_then(|blocks| blocks.get(0))
        .and_then(|entry| handled_from(entry, "by")))
}

fn steward_who_locked(wiki: &dyn WikiApi, account: &str) -> Result<Option<HandledBy>> {
    let title = format!("User:{account}@global");
    let query = wiki.api_query(&[
        ("list", "logevents"),
        ("letype", "globalauth"),
        ("letitle", &title),
    ])?;
    let Some(entry) = query.get("logevents").and_then(|events| events.get(0)) else {
        return Ok(None);
    };
    if !entry.get("params").is_some_and(mentions_locked) {
        return Ok(None);
    }
    Ok(handled_from(entry, "user"))
}

fn handled_from(entry: &Value, steward_key: &str) -> Option<HandledBy> {
    let steward = entry.get(steward_key)?.as_str()?.to_owned();
    let at = entry
        .get("timestamp")?
        .as_str()
        .and_then(parse_api_timestamp)?;
    Some(HandledBy { steward, at })
}

/// The globalauth log carries its action in `params."0"`, as a plain
/// string on old entries and a list on newer ones.
fn mentions_locked(params: &Value) -> bool {
    match params.get("0") {
        Some(Value::String(action)) => action.contains("locked"),
        Some(Value::Array(actions)) => actions
            .iter()
            .filter_map(Value::as_str)
            .any(|action| action.contains("locked")),
        _ => false,
    }
}

/// Resolve every target in a section. `None` when any target is still
/// unhandled or was handled less than `time_min` seconds ago.
fn resolve_section(
    wiki: &dyn WikiApi,
    targets: &SectionTargets,
    now: DateTime<Utc>,
    time_min: i64,
) -> Result<Option<Vec<String>>> {
    let mut stewards = Vec::new();
    for ip in &targets.ips {
        let Some(handled) = steward_who_blocked(wiki, ip)? else {
            return Ok(None);
        };
        if (now - handled.at).num_seconds() < time_min {
            return Ok(None);
        }
        add_distinct(&mut stewards, handled.steward);
    }
    for account in &targets.accounts {
        let Some(handled) = steward_who_locked(wiki, account)? else {
            return Ok(None);
        };
        if (now - handled.at).num_seconds() < time_min {
            return Ok(None);
        }
        add_distinct(&mut stewards, handled.steward);
    }
    Ok(Some(stewards))
}

fn add_distinct(list: &mut Vec<String>, name: String) {
    if !list.iter().any(|existing| *existing == name) {
        list.push(name);
    }
}

/// Set the status to `alreadydone` and append one attribution note.
fn mark_already_done(section: &mut Section, stewards: &[String]) {
    let templates = find_templates(&section.text);
    if let Some(status) = templates.iter().find(|t| t.name_matches(&STATUS_TEMPLATES)) {
        let replacement = status.with_sole_positional("alreadydone");
        section
            .text
            .replace_range(status.start..status.end, &replacement);
    }
    if !section.text.ends_with('\n') {
        section.text.push('\n');
    }
    section.text.push_str(&format!(
        ": {{{{alreadydone}}}} by {} ~~~~\n",
        stewards.join(", ")
    ));
}

fn mark_summary(count: usize) -> String {
    if count == 1 {
        "Bot: mark 1 request as already done".to_owned()
    } else {
        format!("Bot: mark {count} requests as already done")
    }
}

pub struct StewardRequestClerk;

impl TaskLogic for StewardRequestClerk {
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
        let page_title = task.config_str(wiki, "page")?;
        let time_min = task.config_i64(wiki, "time_min")?;

        let page = wiki.get_page(&page_title)?;
        if !page.exists {
            warn!(page = %page_title, "request page does not exist");
            return Ok(());
        }

        let mut sections = split_sections(&page.text, 3);
        let now = Utc::now();
        let mut marked = 0usize;

        for section in &mut sections.sections {
            if section.level != 3 {
                continue;
            }
            ctx.check_interrupt()?;
            let Some(targets) = scan_section(&section.text) else {
                continue;
            };
            if targets.accounts.is_empty() && targets.ips.is_empty() {
                continue;
            }
            let Some(stewards) = resolve_section(wiki, &targets, now, time_min)? else {
                debug!(section = %section.heading, "targets not fully handled yet");
                continue;
            };
            if stewards.is_empty() {
                continue;
            }

            info!(
                section = %section.heading,
                stewards = %stewards.join(", "),
                "marking request as already done"
            );
            mark_already_done(section, &stewards);
            marked += 1;
        }

        if marked == 0 {
            info!("no fully handled requests");
            return Ok(());
        }
        if !task.should_edit() {
            info!("not authorized to edit");
            return Ok(());
        }
        if task.manual_run()
            && !ctx.confirm(&format!(
                "Mark {marked} requests as already done on {page_title}?"
            ))
        {
            return Ok(());
        }

        wiki.save_page(
            &page_title,
            &sections.render(),
            &mark_summary(marked),
            &SaveOptions {
                minor: false,
                bot_flag: task.should_use_bot_flag(),
            },
        )?;
        task.record_trial_edit()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
