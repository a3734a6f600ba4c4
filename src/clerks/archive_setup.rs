//! Task 4: set up automatic archiving on oversized talk pages on the
//! Albanian Wikipedia.
//!
//! Candidates come from the replica mirror: large talk pages that do not
//! yet transclude the archiver configuration or the opt-out marker. Each
//! candidate is tagged with a subst template that expands into a full
//! archiver setup. Runs only when invoked with `--param autosetup`.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::error::Result;
use crate::task::{ConfigMap, RunContext, Task, TaskLogic, TaskMeta};
use crate::wiki::api::SaveOptions;

const CONFIG_PAGE: &str = "User:WikiClerk/Options";

pub fn task() -> Task {
    Task::new(
        TaskMeta {
            number: 4,
            name: "Archive utility".to_owned(),
            site: "sq".to_owned(),
            family: "wikipedia".to_owned(),
            continuous: false,
            supports_manual_run: true,
            configuration_page: Some(CONFIG_PAGE.to_owned()),
        },
        Arc::new(ArchiveSetupClerk),
    )
}

fn defaults() -> ConfigMap {
    let mut map = ConfigMap::new();
    map.insert("autosetup_run".to_owned(), json!(false));
    map.insert(
        "autosetup_tag".to_owned(),
        json!("{{subst:Përdoruesi:WikiClerk/arkivimi automatik}}"),
    );
    map.insert(
        "autosetup_summary".to_owned(),
        json!("WikiClerk: Vendosja e faqes së diskutimit për arkivim automatik"),
    );
    map.insert("autosetup_min_bytes".to_owned(), json!(5000));
    map.insert("autosetup_page_limit".to_owned(), json!(20));
    map.insert(
        "autosetup_skip_templates".to_owned(),
        json!(["WikiClerk/config", "WikiClerk/no-autotag"]),
    );
    map
}

pub struct ArchiveSetupClerk;

impl TaskLogic for ArchiveSetupClerk {
    fn default_configuration(&self) -> ConfigMap {
        defaults()
    }

    fn run(&self, task: &mut Task, ctx: &RunContext) -> Result<()> {
        if task.param() != Some("autosetup") {
            warn!(param = ?task.param(), "unknown mode, expected --param autosetup");
            return Ok(());
        }

        let wiki = ctx.wiki.as_ref();
        task.merge_task_configuration(wiki, &defaults())?;
        if !task.config_bool(wiki, "autosetup_run")? {
            info!("disabled in configuration");
            return Ok(());
        }
        let tag = task.config_str(wiki, "autosetup_tag")?;
        let summary = task.config_str(wiki, "autosetup_summary")?;
        let min_bytes = task.config_i64(wiki, "autosetup_min_bytes")?;
        let limit = usize::try_from(task.config_i64(wiki, "autosetup_page_limit")?).unwrap_or(0);
        let skip_templates = task.config_str_list(wiki, "autosetup_skip_templates")?;

        let replica = ctx.replicas.open(&task.meta().dbname())?;
        if replica.is_lagged()? {
            warn!("replica is lagging, not processing");
            return Ok(());
        }
        let candidates = replica.large_untagged_talk_pages(min_bytes, &skip_templates, limit)?;
        info!(count = candidates.len(), "untagged talk pages found");

        for candidate in candidates {
            ctx.check_interrupt()?;
            let title = format!("Talk:{}", candidate.title);
            let page = wiki.get_page(&title)?;
            if page.id != Some(candidate.id) {
                // The mirror row no longer names this page (moved or
                // deleted since the last sync).
                warn!(page = %title, "page id differs from replica row, skipping");
                continue;
            }
            if !task.should_edit() {
                info!("not authorized to edit, stopping");
                break;
            }
            if task.manual_run() && !ctx.confirm(&format!("Tag {title} for automatic archiving?")) {
                continue;
            }

            info!(page = %title, bytes = page.text.len(), "tagging for automatic archiving");
            let tagged = format!("{tag}\n\n{}", page.text);
            wiki.save_page(
                &title,
                &tagged,
                &summary,
                &SaveOptions {
                    minor: false,
                    bot_flag: task.should_use_bot_flag(),
                },
            )?;
            task.record_trial_edit()?;
        }
        Ok(())
    }
}
