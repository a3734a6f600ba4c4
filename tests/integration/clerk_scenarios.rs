//! End-to-end clerk passes over in-memory wikis: pruning, trials,
//! manual confirmation and report archiving.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use wikiclerk::clerks::{filter_reports, requested_articles};
use wikiclerk::runner;
use wikiclerk::store::JobStatus;
use wikiclerk::task::RunContext;
use wikiclerk::wiki::api::{Revision, UserInfo, WikiApi};

use crate::helpers::{FakeReplicas, FakeWiki, NoReplicas, approve, open_store};

const REQUEST_PAGE: &str = "Wikipedia:Artikkelitoiveet/Tekniikka";
const REQUEST_LIST: &str = "Toivelista.\n\
    * [[Hydraulinen puristin]] perustelut\n\
    * [[Höyryturbiini]] säilytä tämä\n\
    * [[Polttokenno]]\n";

const REPORTS_PAGE: &str = "Wikipedia:Edit filter/False positives/Reports";

fn report_revision(text: &str) -> Revision {
    Revision {
        text: text.to_owned(),
        timestamp: None,
        user: None,
    }
}

#[test]
fn fulfilled_requests_are_pruned_end_to_end() {
    let (_dir, store) = open_store();
    approve(&store, 2);
    let wiki = Arc::new(FakeWiki::new());
    wiki.set_page(REQUEST_PAGE, REQUEST_LIST);

    let mut task = requested_articles::task();
    task.activate(Arc::clone(&store)).expect("activate");
    let ctx = RunContext::new(
        Arc::clone(&wiki) as Arc<dyn WikiApi>,
        Arc::new(FakeReplicas::with_articles(&[
            "Hydraulinen puristin",
            "Polttokenno",
        ])),
    );
    runner::run_task(&mut task, &store, &ctx, None).expect("run");

    let saves = wiki.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].title, REQUEST_PAGE);
    assert_eq!(
        saves[0].text,
        "Toivelista.\n* [[Höyryturbiini]] säilytä tämä\n"
    );
    assert_eq!(
        saves[0].summary,
        "Botti: poistetaan toteutuneita artikkelitoiveita"
    );
    assert!(saves[0].bot_flag);
    assert!(!saves[0].minor);

    let jobs = store.jobs_for_task(2, 10).expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Done);
    assert_eq!(jobs[0].job_name, "Requested articles clerk");
    assert_eq!(jobs[0].task_wiki, "fiwiki");
}

#[test]
fn lagging_replicas_abstain_from_the_pass() {
    let (_dir, store) = open_store();
    approve(&store, 2);
    let wiki = Arc::new(FakeWiki::new());
    wiki.set_page(REQUEST_PAGE, REQUEST_LIST);

    let mut task = requested_articles::task();
    task.activate(Arc::clone(&store)).expect("activate");
    let ctx = RunContext::new(Arc::clone(&wiki) as Arc<dyn WikiApi>, Arc::new(FakeReplicas::lagged(45.0)));
    runner::run_task(&mut task, &store, &ctx, None).expect("run");

    assert!(wiki.saves().is_empty());
    assert_eq!(
        store.jobs_for_task(2, 10).expect("jobs")[0].status,
        JobStatus::Done
    );
}

#[test]
fn trial_edit_budget_gates_a_second_pass() {
    let (_dir, store) = open_store();
    store.open_trial(2, -1, 1).expect("trial");
    let wiki = Arc::new(FakeWiki::new());
    wiki.set_page(REQUEST_PAGE, REQUEST_LIST);

    let mut task = requested_articles::task();
    task.activate(Arc::clone(&store)).expect("activate");
    let ctx = RunContext::new(
        Arc::clone(&wiki) as Arc<dyn WikiApi>,
        Arc::new(FakeReplicas::with_articles(&["Polttokenno"])),
    );

    runner::run_task(&mut task, &store, &ctx, None).expect("first run");
    let saves = wiki.saves();
    assert_eq!(saves.len(), 1);
    // Trial edits stay visible in watchlists.
    assert!(!saves[0].bot_flag);

    // Restore the pruned entry; the exhausted trial blocks the next pass.
    wiki.set_page(REQUEST_PAGE, REQUEST_LIST);
    runner::run_task(&mut task, &store, &ctx, None).expect("second run");
    assert_eq!(wiki.saves().len(), 1);
    assert_eq!(
        store
            .latest_trial(2)
            .expect("latest")
            .expect("some")
            .edits_done,
        1
    );
    assert!(!task.should_edit());
}

#[test]
fn manual_runs_prompt_before_saving() {
    let (_dir, store) = open_store();
    approve(&store, 2);
    let wiki = Arc::new(FakeWiki::new());
    wiki.set_page(REQUEST_PAGE, REQUEST_LIST);

    let prompts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&prompts);
    let ctx = RunContext::new(
        Arc::clone(&wiki) as Arc<dyn WikiApi>,
        Arc::new(FakeReplicas::with_articles(&["Hydraulinen puristin"])),
    )
    .with_confirmer(move |prompt| {
        seen.lock().unwrap().push(prompt.to_owned());
        true
    });

    let mut task = requested_articles::task();
    task.activate(Arc::clone(&store)).expect("activate");
    runner::run_task_manually(&mut task, &store, &ctx, None).expect("manual run");

    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Remove 1 fulfilled requests"));
    let saves = wiki.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(
        saves[0].text,
        "Toivelista.\n* [[Höyryturbiini]] säilytä tämä\n* [[Polttokenno]]\n"
    );
    assert!(!task.manual_run());
}

#[test]
fn declined_confirmation_saves_nothing() {
    let (_dir, store) = open_store();
    approve(&store, 2);
    let wiki = Arc::new(FakeWiki::new());
    wiki.set_page(REQUEST_PAGE, REQUEST_LIST);

    let mut task = requested_articles::task();
    task.activate(Arc::clone(&store)).expect("activate");
    let ctx = RunContext::new(
        Arc::clone(&wiki) as Arc<dyn WikiApi>,
        Arc::new(FakeReplicas::with_articles(&["Polttokenno"])),
    )
    .with_confirmer(|_| false);

    runner::run_task_manually(&mut task, &store, &ctx, None).expect("manual run");

    assert!(wiki.saves().is_empty());
    assert_eq!(
        store.jobs_for_task(2, 10).expect("jobs")[0].status,
        JobStatus::Done
    );
}

#[test]
fn blocked_reporters_get_one_notice_not_two() {
    let (_dir, store) = open_store();
    approve(&store, 1);
    let wiki = Arc::new(FakeWiki::new());
    let report = "Header text.\n\
        == VandalFan ==\n\
        ;Page you were editing\n\
        : [[Sandbox]]\n\
        report body\n";
    wiki.set_revisions(
        REPORTS_PAGE,
        vec![report_revision(report), report_revision(report)],
    );
    wiki.set_user(UserInfo {
        name: "VandalFan".to_owned(),
        blocked: true,
        blocked_by: Some("AdminOne".to_owned()),
        block_reason: Some("Vandalism".to_owned()),
    });

    let mut task = filter_reports::task();
    task.activate(Arc::clone(&store)).expect("activate");
    let ctx = RunContext::new(Arc::clone(&wiki) as Arc<dyn WikiApi>, Arc::new(NoReplicas));

    runner::run_task(&mut task, &store, &ctx, None).expect("first pass");
    let saves = wiki.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].title, REPORTS_PAGE);
    assert!(saves[0].text.contains("{{EFFP|b|VandalFan|AdminOne|bot=1}}"));
    assert!(saves[0].summary.contains("note blocked reporter"));

    // Reprocessing the clerked text must not duplicate the notice.
    let clerked = saves[0].text.clone();
    wiki.set_revisions(
        REPORTS_PAGE,
        vec![report_revision(&clerked), report_revision(&clerked)],
    );
    runner::run_task(&mut task, &store, &ctx, None).expect("second pass");
    assert_eq!(wiki.saves().len(), 1);

    // Continuous tasks never get job rows.
    assert!(store.jobs_for_task(1, 10).expect("jobs").is_empty());
}

#[test]
fn closed_reports_roll_into_a_bounded_archive() {
    let (_dir, store) = open_store();
    approve(&store, 1);
    let wiki = Arc::new(FakeWiki::new());
    wiki.set_page(
        "User:WikiClerk/EFFP helper configuration",
        "// keep the rolling archive small\n{\n  \"rolling_archive_max_sections\": 2\n}\n",
    );

    let now = Utc::now();
    let old_sig = (now - Duration::days(3)).format("%H:%M, %-d %B %Y");
    let fresh_sig = (now - Duration::hours(1)).format("%H:%M, %-d %B %Y");
    let reports = format!(
        "Intro.\n== OldReport ==\nreport body\n:{{{{EFFP|d}}}} resolved {old_sig} (UTC)\n\
         == FreshReport ==\nnewer report {fresh_sig} (UTC)\n"
    );
    wiki.set_revisions(
        REPORTS_PAGE,
        vec![report_revision(&reports), report_revision(&reports)],
    );
    wiki.set_page(
        "Wikipedia:Edit filter/False positives/Reports/Archive",
        "== First existing ==\nold\n== Second existing ==\nless old\n",
    );

    let mut task = filter_reports::task();
    task.activate(Arc::clone(&store)).expect("activate");
    let ctx = RunContext::new(Arc::clone(&wiki) as Arc<dyn WikiApi>, Arc::new(NoReplicas));
    runner::run_task(&mut task, &store, &ctx, None).expect("run");

    let saves = wiki.saves();
    assert_eq!(saves.len(), 2);

    // The archive keeps its newest sections plus the new arrival.
    assert_eq!(
        saves[0].title,
        "Wikipedia:Edit filter/False positives/Reports/Archive"
    );
    assert!(!saves[0].text.contains("== First existing =="));
    assert!(saves[0].text.contains("== Second existing =="));
    assert!(saves[0].text.contains("== OldReport =="));
    assert_eq!(saves[0].summary, "Add 1 archived sections");

    assert_eq!(saves[1].title, REPORTS_PAGE);
    assert!(!saves[1].text.contains("== OldReport =="));
    assert!(saves[1].text.contains("== FreshReport =="));
    assert_eq!(saves[1].summary, "Bot clerking: Archive section OldReport");
}
