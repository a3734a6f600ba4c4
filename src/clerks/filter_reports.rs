//! Task 1: clerk the edit filter false-positive reports page.
//!
//! Each report is one level-2 section headed by the reporter's username.
//! New reports get the affected page title filled in or corrected from
//! the reporter's latest abuse-log hit, a notice when no filter was
//! triggered at all, and a notice when the matching filter is private.
//! Open reports from blocked users get a block notice. Closed or stale
//! reports move to a rolling archive page with a bounded section count.
//!
//! The task is continuous: after one initial pass it watches the change
//! stream for the report page and reprocesses on every edit not marked
//! `!nobot!`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{ClerkError, Result};
use crate::task::{ConfigMap, ReloadEffect, RunContext, Task, TaskLogic, TaskMeta};
use crate::wiki::api::{SaveOptions, StreamSubscription, WikiApi};
use crate::wiki::text::{Section, latest_signature_timestamp, split_sections};

const CONFIG_PAGE: &str = "User:WikiClerk/EFFP helper configuration";

const NOTE_NO_FILTER: &str = ":{{EFFP|nofilterstriggered|bot=1}} ~~~~\n";
const NOTE_TITLE_ADDED: &str = ":{{EFFP|pagenameadded|bot=1}} ~~~~\n";
const NOTE_TITLE_FIXED: &str = ":{{EFFP|pagenamefixed|bot=1}} ~~~~\n";
const NOTE_PRIVATE_FILTER: &str = ":{{EFFP|p|bot=1}} ~~~~\n";

pub fn task() -> Task {
    Task::new(
        TaskMeta {
            number: 1,
            name: "Edit filter helper".to_owned(),
            site: "en".to_owned(),
            family: "wikipedia".to_owned(),
            continuous: true,
            supports_manual_run: false,
            configuration_page: Some(CONFIG_PAGE.to_owned()),
        },
        Arc::new(FilterReportClerk),
    )
}

fn defaults() -> ConfigMap {
    let mut map = ConfigMap::new();
    map.insert(
        "reports_page".to_owned(),
        json!("Wikipedia:Edit filter/False positives/Reports"),
    );
    // When non-empty, clerked output goes here instead of the report
    // page itself. Used for supervised trials.
    map.insert("page_to_write_reports".to_owned(), json!(""));
    map.insert(
        "rolling_archive_page".to_owned(),
        json!("Wikipedia:Edit filter/False positives/Reports/Archive"),
    );
    map.insert("rolling_archive_max_sections".to_owned(), json!(250));
    map.insert("page_field_label".to_owned(), json!(";Page you were editing"));
    map.insert(
        "page_missing_placeholder".to_owned(),
        json!("Page not specified"),
    );
    map.insert(
        "abuse_log_url".to_owned(),
        json!("https://en.wikipedia.org/wiki/Special:AbuseLog?wpSearchTitle="),
    );
    map.insert(
        "section_closed_markers".to_owned(),
        json!([
            "{{effp|f|", "{{effp|f}}", "{{effp|fixed",
            "{{effp|d|", "{{effp|d}}", "{{effp|done",
            "{{effp|t|", "{{effp|t}}", "{{effp|talk",
            "{{effp|a|", "{{effp|a}}", "{{effp|alreadydone",
            "{{effp|nd}}", "{{effp|notdone}}",
            "{{effp|v}}", "{{effp|denied}}",
            "{{effp|b|", "{{effp|b}}", "{{effp|blocked",
        ]),
    );
    map.insert("archive_blockers".to_owned(), json!([]));
    map.insert(
        "archive_delays".to_owned(),
        json!({
            "{{effp|f": 86_400,
            "{{effp|d": 86_400,
            "{{effp|a": 86_400,
            "{{effp|nd": 86_400,
            "{{effp|b": 86_400,
            "{{effp|t": 259_200,
        }),
    );
    map.insert("no_resolution_archive_secs".to_owned(), json!(604_800));
    map
}

/// The live clerking rules, loaded from configuration once per pass.
struct ReportRules {
    reports_page: String,
    write_override: String,
    archive_page: String,
    archive_max_sections: usize,
    page_field_label: String,
    missing_placeholder: String,
    abuse_log_url: String,
    closed_markers: Vec<String>,
    archive_blockers: Vec<String>,
    archive_delays: Vec<(String, i64)>,
    no_resolution_secs: i64,
}

fn load_rules(task: &mut Task, wiki: &dyn WikiApi) -> Result<ReportRules> {
    task.merge_task_configuration(wiki, &defaults())?;
    let archive_delays = task
        .config_object(wiki, "archive_delays")?
        .into_iter()
        .map(|(marker, value)| {
            let Some(secs) = value.as_i64() else {
                return Err(ClerkError::Config(format!(
                    "task 1: archive delay for '{marker}' must be integer seconds"
                )));
            };
            Ok((marker, secs))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ReportRules {
        reports_page: task.config_str(wiki, "reports_page")?,
        write_override: task.config_str(wiki, "page_to_write_reports")?,
        archive_page: task.config_str(wiki, "rolling_archive_page")?,
        archive_max_sections: usize::try_from(
            task.config_i64(wiki, "rolling_archive_max_sections")?,
        )
        .unwrap_or(0),
        page_field_label: task.config_str(wiki, "page_field_label")?,
        missing_placeholder: task.config_str(wiki, "page_missing_placeholder")?,
        abuse_log_url: task.config_str(wiki, "abuse_log_url")?,
        closed_markers: task.config_str_list(wiki, "section_closed_markers")?,
        archive_blockers: task.config_str_list(wiki, "archive_blockers")?,
        archive_delays,
        no_resolution_secs: task.config_i64(wiki, "no_resolution_archive_secs")?,
    })
}

pub struct FilterReportClerk;

impl TaskLogic for FilterReportClerk {
    fn default_configuration(&self) -> ConfigMap {
        defaults()
    }

    fn run(&self, task: &mut Task, ctx: &RunContext) -> Result<()> {
        self.process_page(task, ctx)?;

        let reports_page = task.config_str(ctx.wiki.as_ref(), "reports_page")?;
        match ctx.wiki.change_stream(&reports_page)? {
            StreamSubscription::Unsupported => {
                info!("change stream unavailable, single pass only");
                Ok(())
            }
            StreamSubscription::Subscribed(events) => {
                info!(page = %reports_page, "watching report page edits");
                for event in events {
                    if ctx.interrupted() {
                        info!("interrupt received, leaving the change stream");
                        return Ok(());
                    }
                    if event.comment.contains("!nobot!") {
                        debug!(user = %event.user, "edit is marked !nobot!, skipping");
                        continue;
                    }
                    self.process_page(task, ctx)?;
                    if task.take_reload_effect() == ReloadEffect::RestartStream {
                        info!("watched page moved in configuration, dropping the stream");
                        return Ok(());
                    }
                }
                info!("change stream ended");
                Ok(())
            }
        }
    }

    fn configuration_reloaded(&self, old: &ConfigMap, new: &ConfigMap) -> ReloadEffect {
        if !old.is_empty() && old.get("reports_page") != new.get("reports_page") {
            return ReloadEffect::RestartStream;
        }
        ReloadEffect::None
    }
}

impl FilterReportClerk {
    /// One clerking pass: at most one edit to the report page and one to
    /// the archive page.
    fn process_page(&self, task: &mut Task, ctx: &RunContext) -> Result<()> {
        let wiki = ctx.wiki.as_ref();
        let rules = load_rules(task, wiki)?;
        if !task.should_edit() {
            info!("not authorized to edit, skipping pass");
            return Ok(());
        }

        let revisions = wiki.page_revisions(&rules.reports_page, 2)?;
        let Some(current) = revisions.first() else {
            warn!(page = %rules.reports_page, "report page has no revisions");
            return Ok(());
        };
        let previous_text = revisions.get(1).map_or("", |rev| rev.text.as_str());

        let parsed = split_sections(&current.text, 2);
        let previous_count = split_sections(previous_text, 2).sections.len();
        if previous_count > parsed.sections.len() {
            // a section just disappeared (archive or revert); leave the
            // page alone until the next edit
            info!("section count dropped since the previous revision, skipping pass");
            return Ok(());
        }

        let now = Utc::now();
        let mut kept: Vec<String> = Vec::new();
        let mut processed: Vec<(String, Vec<String>)> = Vec::new();
        let mut archived_texts: Vec<String> = Vec::new();
        let mut archived_titles: Vec<String> = Vec::new();

        for (index, section) in parsed.sections.iter().enumerate() {
            let reporter = section.heading.clone();

            if is_closed(&section.text, &rules.closed_markers) {
                if should_archive(&section.text, &rules, now) {
                    debug!(section = %reporter, "archiving closed report");
                    archived_texts.push(section.text.clone());
                    archived_titles.push(reporter);
                } else {
                    kept.push(section.text.clone());
                }
                continue;
            }

            let mut text = section.text.clone();
            let mut actions = Vec::new();
            if index >= previous_count {
                let (updated, mut new_actions) =
                    clerk_new_report(wiki, &rules, &reporter, &text, now)?;
                text = updated;
                actions.append(&mut new_actions);
            }
            let (updated, mut blocked_actions) = note_blocked_reporter(wiki, &reporter, &text)?;
            text = updated;
            actions.append(&mut blocked_actions);

            if should_archive(&text, &rules, now) {
                debug!(section = %reporter, "archiving stale open report");
                archived_texts.push(text);
                archived_titles.push(reporter);
            } else if text != section.text {
                debug!(section = %reporter, ?actions, "clerked open report");
                processed.push((reporter, actions));
                kept.push(text);
            } else {
                kept.push(text);
            }
        }

        if archived_texts.is_empty() && processed.is_empty() {
            debug!("nothing to clerk");
            return Ok(());
        }
        if !task.should_edit() {
            info!("authorization expired mid-pass, discarding changes");
            return Ok(());
        }

        if !archived_texts.is_empty() {
            append_to_archive(task, wiki, &rules, &archived_texts)?;
        }

        let target = if rules.write_override.is_empty() {
            rules.reports_page.clone()
        } else {
            debug!(page = %rules.write_override, "writing reports to the override page");
            rules.write_override.clone()
        };
        let mut new_text = parsed.lead.clone();
        for text in &kept {
            new_text.push_str(text);
        }
        let summary = build_clerk_summary(&archived_titles, &processed);
        info!(page = %target, %summary, "saving clerked report page");
        wiki.save_page(
            &target,
            &new_text,
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

/// Clerk a section that appeared since the previous revision.
fn clerk_new_report(
    wiki: &dyn WikiApi,
    rules: &ReportRules,
    reporter: &str,
    section: &str,
    now: DateTime<Utc>,
) -> Result<(String, Vec<String>)> {
    let mut text = with_trailing_newline(section);
    let mut actions = Vec::new();

    let reported = reported_title(&text, &rules.page_field_label, &rules.missing_placeholder);

    // a hit older than three hours is assumed unrelated to this report
    let hit = wiki
        .last_abuse_filter_hit(reporter)?
        .filter(|hit| now - hit.timestamp <= Duration::hours(3));

    let Some(hit) = hit else {
        if reported.is_none() {
            text.push_str(NOTE_NO_FILTER);
            actions.push("notify that no filters were triggered".to_owned());
        }
        return Ok((text, actions));
    };

    let missing = reported.is_none();
    let wrong_case = reported
        .as_deref()
        .is_some_and(|title| title != hit.title && title.to_lowercase() == hit.title.to_lowercase());

    if (missing || wrong_case) && !hit.title.is_empty() {
        text = replace_reported_title(&text, &rules.page_field_label, &hit.title, &rules.abuse_log_url);
        if missing {
            text.push_str(NOTE_TITLE_ADDED);
            actions.push("add affected page name".to_owned());
        } else {
            text.push_str(NOTE_TITLE_FIXED);
            actions.push("fix affected page name".to_owned());
        }
    }

    if let Some(filter_id) = hit.filter_id {
        if wiki.is_filter_private(filter_id)? {
            text.push_str(NOTE_PRIVATE_FILTER);
            actions.push("add private filter notice".to_owned());
        }
    }

    Ok((text, actions))
}

/// Add a block notice for the reporter unless one is already present.
fn note_blocked_reporter(
    wiki: &dyn WikiApi,
    reporter: &str,
    section: &str,
) -> Result<(String, Vec<String>)> {
    let mut text = with_trailing_newline(section);
    let mut actions = Vec::new();
    let existing_note = format!("{{{{EFFP|b|{reporter}");
    if text.contains(&existing_note) {
        return Ok((text, actions));
    }
    let user = wiki.user_info(reporter)?;
    if user.blocked {
        let by = user.blocked_by.unwrap_or_else(|| "unknown".to_owned());
        text.push_str(&format!(":{{{{EFFP|b|{reporter}|{by}|bot=1}}}} ~~~~\n"));
        actions.push("note blocked reporter".to_owned());
    }
    Ok((text, actions))
}

/// Append sections to the rolling archive, dropping the oldest when the
/// configured bound is exceeded.
fn append_to_archive(
    task: &mut Task,
    wiki: &dyn WikiApi,
    rules: &ReportRules,
    new_sections: &[String],
) -> Result<()> {
    let page = wiki.get_page(&rules.archive_page)?;
    let mut parsed = split_sections(&page.text, 2);
    for text in new_sections {
        parsed.sections.push(Section {
            level: 2,
            heading: String::new(),
            text: with_trailing_newline(text),
        });
    }
    if rules.archive_max_sections > 0 && parsed.sections.len() > rules.archive_max_sections {
        let excess = parsed.sections.len() - rules.archive_max_sections;
        parsed.sections.drain(..excess);
    }
    let summary = format!("Add {} archived sections", new_sections.len());
    info!(page = %rules.archive_page, count = new_sections.len(), "archiving sections");
    wiki.save_page(
        &rules.archive_page,
        &parsed.render(),
        &summary,
        &SaveOptions {
            minor: false,
            bot_flag: task.should_use_bot_flag(),
        },
    )?;
    task.record_trial_edit()?;
    Ok(())
}

/// Title from the "page you were editing" field, or `None` if the field
/// is absent, empty or still the placeholder.
fn reported_title(section: &str, label: &str, placeholder: &str) -> Option<String> {
    let mut lines = section.lines();
    while let Some(line) = lines.next() {
        if line.trim() != label {
            continue;
        }
        let value = lines.next()?.trim();
        let value = value.strip_prefix(':').unwrap_or(value).trim();
        if value.is_empty() || value == placeholder {
            return None;
        }
        return Some(value.to_owned());
    }
    None
}

/// Replace the value line under the page field with a link to `title`
/// and its filter log. Sections without the field pass through unchanged.
fn replace_reported_title(section: &str, label: &str, title: &str, log_url_prefix: &str) -> String {
    let mut out = String::with_capacity(section.len() + title.len() + 64);
    let mut lines = section.split_inclusive('\n');
    while let Some(line) = lines.next() {
        out.push_str(line);
        if line.trim() == label && lines.next().is_some() {
            let log_url = format!("{log_url_prefix}{}", urlencoding::encode(title));
            out.push_str(&format!(
                ": [[{title}]] (<span class=\"plainlinks\">[{log_url} filter log]</span>)\n"
            ));
        }
    }
    out
}

fn is_closed(section: &str, markers: &[String]) -> bool {
    let lower = section.to_lowercase();
    markers.iter().any(|m| lower.contains(&m.to_lowercase()))
}

/// Whether a section has been quiet long enough to archive.
///
/// The shortest delay among matching resolution markers applies; a
/// section with no marker waits out the no-resolution delay. Sections
/// without a readable signature never archive.
fn should_archive(section: &str, rules: &ReportRules, now: DateTime<Utc>) -> bool {
    let lower = section.to_lowercase();
    if rules
        .archive_blockers
        .iter()
        .any(|b| lower.contains(&b.to_lowercase()))
    {
        return false;
    }
    let Some(last_reply) = latest_signature_timestamp(section) else {
        return false;
    };
    let marker_delay = rules
        .archive_delays
        .iter()
        .filter(|(marker, _)| lower.contains(&marker.to_lowercase()))
        .map(|(_, secs)| *secs)
        .min();
    let wait = marker_delay.unwrap_or(rules.no_resolution_secs);
    (now - last_reply).num_seconds() > wait
}

/// One combined summary for everything a pass did.
fn build_clerk_summary(archived: &[String], processed: &[(String, Vec<String>)]) -> String {
    let mut actions: Vec<&str> = Vec::new();
    for (_, section_actions) in processed {
        for action in section_actions {
            if !actions.contains(&action.as_str()) {
                actions.push(action);
            }
        }
    }

    let mut parts = Vec::new();
    match processed.len() {
        0 => {}
        1 => {
            if !actions.is_empty() && actions.len() <= 3 {
                parts.push(format!(
                    "Processed section {}: {}",
                    processed[0].0,
                    actions.join(", ")
                ));
            } else {
                parts.push(format!("Processed section {}", processed[0].0));
            }
        }
        count => {
            if actions.len() == 1 {
                parts.push(format!("Process {count} sections ({})", actions[0]));
            } else {
                parts.push(format!("Process {count} sections"));
            }
        }
    }
    match archived.len() {
        0 => {}
        1 => parts.push(format!("Archive section {}", archived[0])),
        count => parts.push(format!("Archive {count} sections")),
    }
    format!("Bot clerking: {}", parts.join(", "))
}

fn with_trailing_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_owned()
    } else {
        format!("{text}\n")
    }
}
