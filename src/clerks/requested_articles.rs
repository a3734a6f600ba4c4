//! Task 2: prune fulfilled entries from a requested-articles list on the
//! Finnish Wikipedia.
//!
//! A request line is a bullet entry whose first local link names the
//! wanted article. Once that article exists as a namespace-0
//! non-redirect page on the replica, the entry is removed. Entries
//! matching a configured keep term stay regardless, and an optional
//! gate additionally requires the new article to have a Wikidata item.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::task::{ConfigMap, RunContext, Task, TaskLogic, TaskMeta};
use crate::wiki::api::SaveOptions;
use crate::wiki::text::{first_local_link, list_entry_text, normalize_title};

const CONFIG_PAGE: &str = "Käyttäjä:WikiClerk/Asetukset/Artikkelitoiveiden siivoaja";

pub fn task() -> Task {
    Task::new(
        TaskMeta {
            number: 2,
            name: "Requested articles clerk".to_owned(),
            site: "fi".to_owned(),
            family: "wikipedia".to_owned(),
            continuous: false,
            supports_manual_run: true,
            configuration_page: Some(CONFIG_PAGE.to_owned()),
        },
        Arc::new(RequestedArticlesClerk),
    )
}

fn defaults() -> ConfigMap {
    let mut map = ConfigMap::new();
    map.insert("run".to_owned(), json!(true));
    map.insert("page".to_owned(), json!("Wikipedia:Artikkelitoiveet/Tekniikka"));
    map.insert("keep_terms".to_owned(), json!([]));
    map.insert("require_wikidata".to_owned(), json!(false));
    map.insert(
        "removal_summary".to_owned(),
        json!("Botti: poistetaan toteutuneita artikkelitoiveita"),
    );
    map
}

pub struct RequestedArticlesClerk;

impl TaskLogic for RequestedArticlesClerk {
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
        let page_name = task.config_str(wiki, "page")?;
        let keep_terms = task.config_str_list(wiki, "keep_terms")?;
        let require_wikidata = task.config_bool(wiki, "require_wikidata")?;
        let summary = task.config_str(wiki, "removal_summary")?;

        let replica = ctx.replicas.open(&task.meta().dbname())?;
        if replica.is_lagged()? {
            warn!("replica is lagging, not processing");
            return Ok(());
        }

        let page = wiki.get_page(&page_name)?;
        if !page.exists {
            warn!(page = %page_name, "request page does not exist");
            return Ok(());
        }

        let requests = request_entries(&page.text);
        if requests.is_empty() {
            info!("no request entries found");
            return Ok(());
        }
        let titles: Vec<String> = requests.values().cloned().collect();
        let existing = replica.existing_articles(&titles)?;

        let mut fulfilled = fulfilled_lines(&requests, &existing, &keep_terms, &page.text);
        if require_wikidata {
            let mut gated = Vec::new();
            for (line, title) in fulfilled {
                if wiki.wikidata_id(&title)?.is_some() {
                    gated.push((line, title));
                } else {
                    debug!(article = %title, "no Wikidata item yet, keeping the request");
                }
            }
            fulfilled = gated;
        }
        if fulfilled.is_empty() {
            info!("no fulfilled requests to remove");
            return Ok(());
        }

        if !task.should_edit() {
            info!("not authorized to edit");
            return Ok(());
        }
        if task.manual_run() {
            let prompt = format!(
                "Remove {} fulfilled requests from {}?",
                fulfilled.len(),
                page_name
            );
            if !ctx.confirm(&prompt) {
                info!("operator declined the edit");
                return Ok(());
            }
        }

        let lines: Vec<usize> = fulfilled.iter().map(|(line, _)| *line).collect();
        let new_text = remove_lines(&page.text, &lines);
        info!(removed = fulfilled.len(), page = %page_name, "removing fulfilled requests");
        wiki.save_page(
            &page_name,
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

/// Map of line index to the normalized title of the entry's first local
/// link. Lines that are not list entries, or whose entry has no local
/// link, are absent.
fn request_entries(text: &str) -> HashMap<usize, String> {
    let mut out = HashMap::new();
    for (index, line) in text.lines().enumerate() {
        let Some(entry) = list_entry_text(line) else {
            continue;
        };
        if let Some(link) = first_local_link(entry) {
            out.insert(index, normalize_title(&link));
        }
    }
    out
}

/// Entries whose article now exists, minus any matching a keep term.
/// Returned in line order.
fn fulfilled_lines(
    requests: &HashMap<usize, String>,
    existing: &[String],
    keep_terms: &[String],
    text: &str,
) -> Vec<(usize, String)> {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<(usize, String)> = requests
        .iter()
        .filter(|(_, title)| existing.contains(title))
        .filter(|(index, _)| {
            let line = lines.get(**index).copied().unwrap_or("").to_lowercase();
            !keep_terms
                .iter()
                .any(|term| line.contains(&term.to_lowercase()))
        })
        .map(|(index, title)| (*index, title.clone()))
        .collect();
    out.sort_unstable_by_key(|(index, _)| *index);
    out
}

/// Rebuild `text` without the given line indices.
fn remove_lines(text: &str, lines: &[usize]) -> String {
    text.split_inclusive('\n')
        .enumerate()
        .filter(|(index, _)| !lines.contains(index))
        .map(|(_, line)| line)
        .collect()
}
