//! Task lifecycle: approval, remote configuration and job bookkeeping,
//! driven through the runner with in-memory doubles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use wikiclerk::ClerkError;
use wikiclerk::clerks::requested_articles;
use wikiclerk::runner;
use wikiclerk::store::JobStatus;
use wikiclerk::task::RunContext;
use wikiclerk::wiki::api::WikiApi;

use crate::helpers::{FakeReplicas, FakeWiki, NoReplicas, approve, open_store};

const FI_CONFIG_PAGE: &str = "Käyttäjä:WikiClerk/Asetukset/Artikkelitoiveiden siivoaja";

#[test]
fn approval_survives_reregistration() {
    let (_dir, store) = open_store();
    approve(&store, 2);

    let mut task = requested_articles::task();
    task.activate(Arc::clone(&store)).expect("activate");

    assert!(task.approved());
    assert!(task.should_use_bot_flag());
    assert_eq!(
        store.registered_name(2).expect("name"),
        Some("Requested articles clerk".to_owned())
    );
}

#[test]
fn unapproved_tasks_complete_without_editing() {
    let (_dir, store) = open_store();
    let wiki = Arc::new(FakeWiki::new());
    wiki.set_page(
        "Wikipedia:Artikkelitoiveet/Tekniikka",
        "* [[Hydraulinen puristin]]\n",
    );

    let mut task = requested_articles::task();
    task.activate(Arc::clone(&store)).expect("activate");
    let ctx = RunContext::new(
        Arc::clone(&wiki) as Arc<dyn WikiApi>,
        Arc::new(FakeReplicas::with_articles(&["Hydraulinen puristin"])),
    );
    runner::run_task(&mut task, &store, &ctx, None).expect("run");

    // The pass found work but declined to edit; the job still closes.
    assert!(wiki.saves().is_empty());
    let jobs = store.jobs_for_task(2, 10).expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Done);
}

#[test]
fn configuration_is_cached_within_the_ttl() {
    let wiki = FakeWiki::new();
    wiki.set_page(FI_CONFIG_PAGE, "{\"run\": false}");

    let mut task = requested_articles::task();
    assert!(!task.config_bool(&wiki, "run").expect("first read"));
    assert!(!task.config_bool(&wiki, "run").expect("cached read"));
    assert_eq!(wiki.reads_of(FI_CONFIG_PAGE), 1);

    task.invalidate_configuration();
    task.configuration_map(&wiki).expect("reload");
    assert_eq!(wiki.reads_of(FI_CONFIG_PAGE), 2);
}

#[test]
fn merged_configuration_layers_defaults_under_the_page() {
    let wiki = FakeWiki::new();
    wiki.set_page(
        FI_CONFIG_PAGE,
        "// maintained on wiki\n{\"page\": \"Wikipedia:Artikkelitoiveet/Fysiikka\"}",
    );

    let mut task = requested_articles::task();
    let map = task.merged_configuration(&wiki).expect("merged");

    assert_eq!(
        map.get("page"),
        Some(&json!("Wikipedia:Artikkelitoiveet/Fysiikka"))
    );
    assert_eq!(map.get("run"), Some(&json!(true)));
    assert_eq!(map.get("require_wikidata"), Some(&json!(false)));
}

#[test]
fn malformed_configuration_fails_the_job() {
    let (_dir, store) = open_store();
    let wiki = Arc::new(FakeWiki::new());
    wiki.set_page(FI_CONFIG_PAGE, "{\"run\": tru");

    let mut task = requested_articles::task();
    task.activate(Arc::clone(&store)).expect("activate");
    let ctx = RunContext::new(Arc::clone(&wiki) as Arc<dyn WikiApi>, Arc::new(NoReplicas));

    let err = runner::run_task(&mut task, &store, &ctx, Some("cronjob")).expect_err("must fail");
    assert!(err.to_string().contains("malformed task configuration"));

    let jobs = store.jobs_for_task(2, 10).expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Fail);
    assert_eq!(jobs[0].job_name, "cronjob");
}

#[test]
fn stop_flags_interrupt_between_passes() {
    let stop = Arc::new(AtomicBool::new(false));
    let ctx = RunContext::new(Arc::new(FakeWiki::new()), Arc::new(NoReplicas))
        .with_stop_flag(Arc::clone(&stop));

    assert!(!ctx.interrupted());
    ctx.check_interrupt().expect("not interrupted yet");

    stop.store(true, Ordering::SeqCst);
    assert!(ctx.interrupted());
    assert!(matches!(ctx.check_interrupt(), Err(ClerkError::Interrupted)));
}
