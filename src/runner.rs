//! Job-tracked task execution.
//!
//! Bounded tasks get a job row around each run so operators can see
//! what ran, when and how it ended. Continuous tasks never get one; a
//! row that stayed `RUNNING` for weeks would only mislead.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::{JobStatus, TaskStore};
use crate::task::{RunContext, Task};

/// Run a task with job bookkeeping.
///
/// The job row moves `RUNNING` -> `DONE` or `RUNNING` -> `FAIL` exactly
/// once. When closing the row itself fails after a run error, the run
/// error is what propagates.
pub fn run_task(
    task: &mut Task,
    store: &TaskStore,
    ctx: &RunContext,
    job_name: Option<&str>,
) -> Result<()> {
    run_with(task, store, ctx, job_name, false)
}

/// Like [`run_task`], but through the manual-run path: the task prompts
/// before each edit. Bounded manual runs still get a job row.
pub fn run_task_manually(
    task: &mut Task,
    store: &TaskStore,
    ctx: &RunContext,
    job_name: Option<&str>,
) -> Result<()> {
    run_with(task, store, ctx, job_name, true)
}

fn run_with(
    task: &mut Task,
    store: &TaskStore,
    ctx: &RunContext,
    job_name: Option<&str>,
    manual: bool,
) -> Result<()> {
    let name = job_name.unwrap_or_else(|| task.name()).to_owned();

    if task.meta().continuous {
        debug!(task = task.number(), "continuous task runs without a job row");
        return execute(task, ctx, manual);
    }

    let job_id = store.start_job(&name, task.number(), &task.meta().dbname())?;
    match execute(task, ctx, manual) {
        Ok(()) => {
            store.stop_job(job_id, JobStatus::Done)?;
            info!(task = task.number(), job = job_id, "job finished");
            Ok(())
        }
        Err(err) => {
            warn!(task = task.number(), job = job_id, error = %err, "job failed");
            if let Err(stop_err) = store.stop_job(job_id, JobStatus::Fail) {
                warn!(job = job_id, error = %stop_err, "could not record job failure");
            }
            Err(err)
        }
    }
}

fn execute(task: &mut Task, ctx: &RunContext, manual: bool) -> Result<()> {
    if manual {
        task.do_manual_run(ctx)
    } else {
        task.run(ctx)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::error::ClerkError;
    use crate::store::replica::{ReplicaFactory, ReplicaStore};
    use crate::task::{TaskLogic, TaskMeta};
    use crate::wiki::api::{
        AbuseFilterHit, Page, Revision, SaveOptions, StreamSubscription, UserInfo, WikiApi,
    };
    use std::sync::Arc;

    struct IdleWiki;
    impl WikiApi for IdleWiki {
        fn username(&self) -> Result<String> {
            Ok("TestBot".to_owned())
        }
        fn get_page(&self, title: &str) -> Result<Page> {
            Ok(Page {
                title: title.to_owned(),
                text: String::new(),
                exists: false,
                id: None,
            })
        }
        fn page_revisions(&self, _title: &str, _limit: usize) -> Result<Vec<Revision>> {
            Ok(Vec::new())
        }
        fn save_page(
            &self,
            _title: &str,
            _text: &str,
            _summary: &str,
            _options: &SaveOptions,
        ) -> Result<()> {
            Ok(())
        }
        fn change_stream(&self, _title: &str) -> Result<StreamSubscription> {
            Ok(StreamSubscription::Unsupported)
        }
        fn user_info(&self, username: &str) -> Result<UserInfo> {
            Ok(UserInfo {
                name: username.to_owned(),
                blocked: false,
                blocked_by: None,
                block_reason: None,
            })
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

    struct NoReplicas;
    impl ReplicaFactory for NoReplicas {
        fn open(&self, dbname: &str) -> Result<Box<dyn ReplicaStore>> {
            Err(ClerkError::Replica(format!("no mirror for {dbname}")))
        }
    }

    struct FixedOutcome {
        fail: bool,
    }
    impl TaskLogic for FixedOutcome {
        fn run(&self, _task: &mut Task, _ctx: &RunContext) -> Result<()> {
            if self.fail {
                return Err(ClerkError::Task("boom".to_owned()));
            }
            Ok(())
        }
    }

    fn context() -> RunContext {
        RunContext::new(Arc::new(IdleWiki), Arc::new(NoReplicas))
    }

    fn build_task(number: u32, continuous: bool, fail: bool) -> Task {
        Task::new(
            TaskMeta {
                number,
                name: format!("runner test {number}"),
                site: "en".to_owned(),
                family: "wikipedia".to_owned(),
                continuous,
                supports_manual_run: false,
                configuration_page: None,
            },
            Arc::new(FixedOutcome { fail }),
        )
    }

    fn open_store() -> (tempfile::TempDir, Arc<TaskStore>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::open(&dir.path().join("clerk.db")).expect("store");
        (dir, Arc::new(store))
    }

    #[test]
    fn successful_run_closes_the_job_as_done() {
        let (_dir, store) = open_store();
        let mut task = build_task(1, false, false);
        task.activate(Arc::clone(&store)).expect("activate");

        run_task(&mut task, &store, &context(), None).expect("run");

        let jobs = store.jobs_for_task(1, 10).expect("jobs");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Done);
        assert_eq!(jobs[0].job_name, "runner test 1");
        assert_eq!(jobs[0].task_wiki, "enwiki");
        assert!(jobs[0].ended_at.is_some());
    }

    #[test]
    fn failed_run_closes_the_job_as_fail_and_propagates() {
        let (_dir, store) = open_store();
        let mut task = build_task(2, false, true);
        task.activate(Arc::clone(&store)).expect("activate");

        let err = run_task(&mut task, &store, &context(), None).expect_err("must fail");
        assert!(matches!(err, ClerkError::Task(_)));

        let jobs = store.jobs_for_task(2, 10).expect("jobs");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Fail);
        assert!(jobs[0].ended_at.is_some());
    }

    #[test]
    fn continuous_tasks_run_without_a_job_row() {
        let (_dir, store) = open_store();
        let mut task = build_task(3, true, false);
        task.activate(Arc::clone(&store)).expect("activate");

        run_task(&mut task, &store, &context(), None).expect("run");
        assert!(store.jobs_for_task(3, 10).expect("jobs").is_empty());
    }

    #[test]
    fn explicit_job_name_overrides_the_task_name() {
        let (_dir, store) = open_store();
        let mut task = build_task(4, false, false);
        task.activate(Arc::clone(&store)).expect("activate");

        run_task(&mut task, &store, &context(), Some("nightly sweep")).expect("run");
        let jobs = store.jobs_for_task(4, 10).expect("jobs");
        assert_eq!(jobs[0].job_name, "nightly sweep");
    }

    #[test]
    fn manual_runs_carry_the_flag_and_a_job_row() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct SeesManual {
            saw_manual: Arc<AtomicBool>,
        }
        impl TaskLogic for SeesManual {
            fn run(&self, task: &mut Task, _ctx: &RunContext) -> Result<()> {
                self.saw_manual.store(task.manual_run(), Ordering::SeqCst);
                Ok(())
            }
        }

        let (_dir, store) = open_store();
        let saw_manual = Arc::new(AtomicBool::new(false));
        let mut task = Task::new(
            TaskMeta {
                number: 5,
                name: "runner test 5".to_owned(),
                site: "en".to_owned(),
                family: "wikipedia".to_owned(),
                continuous: false,
                supports_manual_run: true,
                configuration_page: None,
            },
            Arc::new(SeesManual {
                saw_manual: Arc::clone(&saw_manual),
            }),
        );
        task.activate(Arc::clone(&store)).expect("activate");

        run_task_manually(&mut task, &store, &context(), None).expect("run");

        assert!(saw_manual.load(Ordering::SeqCst));
        let jobs = store.jobs_for_task(5, 10).expect("jobs");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Done);
    }
}
