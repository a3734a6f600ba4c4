//! Job/trial store: task registration, approval flags, edit trials and
//! job run records in one SQLite database.
//!
//! Connections are request-scoped: a [`StoreSession`] guard keeps the
//! shared connection open, nested guards share it through a reference
//! count, and the connection closes when the last guard drops. Calls
//! made without a live session open a transient connection for just
//! that call.

pub mod replica;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::{ClerkError, Result};
use crate::task::trial::Trial;

pub use replica::{REPLICA_LAG_LIMIT_SECS, ReplicaFactory, ReplicaPool, ReplicaStore};

/// Lifecycle of one job run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Done,
    Fail,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
            JobStatus::Fail => "FAIL",
        }
    }

    fn parse(raw: &str) -> rusqlite::Result<Self> {
        match raw {
            "RUNNING" => Ok(JobStatus::Running),
            "DONE" => Ok(JobStatus::Done),
            "FAIL" => Ok(JobStatus::Fail),
            other => Err(rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown job status {other:?}").into(),
            )),
        }
    }
}

/// One job run record.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub status: JobStatus,
    pub job_name: String,
    pub task_id: u32,
    pub task_wiki: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

struct ConnState {
    conn: Option<Connection>,
    sessions: u32,
}

/// The job/trial store.
pub struct TaskStore {
    path: PathBuf,
    state: Mutex<ConnState>,
}

/// RAII session guard; see [`TaskStore::session`].
pub struct StoreSession<'a> {
    store: &'a TaskStore,
}

impl Drop for StoreSession<'_> {
    fn drop(&mut self) {
        self.store.release();
    }
}

impl TaskStore {
    /// Open (or create) the store and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        schema::apply_schema(&conn)?;
        drop(conn);
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(ConnState {
                conn: None,
                sessions: 0,
            }),
        })
    }

    /// Acquire a session, opening the shared connection if needed.
    ///
    /// Sessions nest: the connection closes when the last guard drops.
    pub fn session(&self) -> Result<StoreSession<'_>> {
        let mut state = self.lock_state()?;
        if state.conn.is_none() {
            state.conn = Some(Connection::open(&self.path)?);
        }
        state.sessions += 1;
        Ok(StoreSession { store: self })
    }

    fn release(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.sessions = state.sessions.saturating_sub(1);
            if state.sessions == 0 {
                state.conn = None;
            }
        }
    }

    /// Number of live session guards.
    pub fn active_sessions(&self) -> u32 {
        self.state.lock().map(|s| s.sessions).unwrap_or(0)
    }

    /// Whether the shared connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.conn.is_some())
            .unwrap_or(false)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ConnState>> {
        self.state
            .lock()
            .map_err(|_| ClerkError::Lock("job store".to_owned()))
    }

    /// Run `f` against the shared connection when a session holds one
    /// open, or a transient connection otherwise.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let state = self.lock_state()?;
        match state.conn.as_ref() {
            Some(conn) => Ok(f(conn)?),
            None => {
                let conn = Connection::open(&self.path)?;
                Ok(f(&conn)?)
            }
        }
    }

    // -- tasks ------------------------------------------------------------

    /// Insert or rename a task registration. Approval is preserved on
    /// re-registration.
    pub fn register_task(&self, id: u32, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, name, approved) VALUES (?1, ?2, 0)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![id, name],
            )?;
            Ok(())
        })
    }

    /// Approval flag for a task; unregistered tasks are unapproved.
    pub fn is_approved(&self, id: u32) -> Result<bool> {
        self.with_conn(|conn| {
            let approved: Option<i64> = conn
                .query_row(
                    "SELECT approved FROM tasks WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(approved.unwrap_or(0) != 0)
        })
    }

    /// Flip a task's approval flag (operator action).
    pub fn set_approved(&self, id: u32, approved: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET approved = ?1 WHERE id = ?2",
                params![approved, id],
            )?;
            Ok(())
        })
    }

    /// Registered display name for a task.
    pub fn registered_name(&self, id: u32) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT name FROM tasks WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    // -- trials -----------------------------------------------------------

    /// Grant a new trial (operator action).
    pub fn open_trial(&self, task_id: u32, max_days: i64, max_edits: i64) -> Result<Trial> {
        let created_at = epoch_to_datetime(Utc::now().timestamp());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO task_trials (task_id, created_at, max_days, max_edits, edits_done, closed)
                 VALUES (?1, ?2, ?3, ?4, 0, 0)",
                params![task_id, created_at.timestamp(), max_days, max_edits],
            )?;
            Ok(Trial {
                id: conn.last_insert_rowid(),
                task_id,
                created_at,
                max_days,
                max_edits,
                edits_done: 0,
                closed: false,
            })
        })
    }

    /// Latest non-closed trial for a task, if any.
    ///
    /// Age and edit-budget expiry are read-time decisions left to the
    /// caller; only administrative closure is filtered in SQL.
    pub fn latest_trial(&self, task_id: u32) -> Result<Option<Trial>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, task_id, created_at, max_days, max_edits, edits_done, closed
                 FROM task_trials
                 WHERE task_id = ?1 AND closed = 0
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
                params![task_id],
                row_to_trial,
            )
            .optional()
        })
    }

    /// Increment a trial's stored edit counter.
    pub fn record_trial_edit(&self, trial_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE task_trials SET edits_done = edits_done + 1 WHERE id = ?1",
                params![trial_id],
            )?;
            Ok(())
        })
    }

    /// Close a trial (operator action).
    pub fn close_trial(&self, trial_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE task_trials SET closed = 1 WHERE id = ?1",
                params![trial_id],
            )?;
            Ok(())
        })
    }

    // -- jobs -------------------------------------------------------------

    /// Insert a RUNNING job row and return its id.
    pub fn start_job(&self, job_name: &str, task_id: u32, task_wiki: &str) -> Result<i64> {
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (status, job_name, task_id, task_wiki, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    JobStatus::Running.as_str(),
                    job_name,
                    task_id,
                    task_wiki,
                    Utc::now().timestamp()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        debug!(job_id = id, job_name, task_id, "job started");
        Ok(id)
    }

    /// Transition a RUNNING job to DONE or FAIL, exactly once.
    pub fn stop_job(&self, job_id: i64, status: JobStatus) -> Result<()> {
        let updated = self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET status = ?1, ended_at = ?2
                 WHERE id = ?3 AND status = ?4",
                params![
                    status.as_str(),
                    Utc::now().timestamp(),
                    job_id,
                    JobStatus::Running.as_str()
                ],
            )
        })?;
        if updated == 0 {
            return Err(ClerkError::Task(format!(
                "job {job_id} is not running, cannot mark {}",
                status.as_str()
            )));
        }
        debug!(job_id, status = status.as_str(), "job stopped");
        Ok(())
    }

    /// Single job row lookup.
    pub fn job(&self, job_id: i64) -> Result<Option<Job>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, status, job_name, task_id, task_wiki, started_at, ended_at
                 FROM jobs WHERE id = ?1",
                params![job_id],
                row_to_job,
            )
            .optional()
        })
    }

    /// Job rows for one task, newest first.
    pub fn jobs_for_task(&self, task_id: u32, limit: usize) -> Result<Vec<Job>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, status, job_name, task_id, task_wiki, started_at, ended_at
                 FROM jobs WHERE task_id = ?1
                 ORDER BY started_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![task_id, limit as i64], row_to_job)?;
            rows.collect()
        })
    }
}

fn row_to_trial(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trial> {
    Ok(Trial {
        id: row.get(0)?,
        task_id: row.get(1)?,
        created_at: epoch_to_datetime(row.get(2)?),
        max_days: row.get(3)?,
        max_edits: row.get(4)?,
        edits_done: row.get(5)?,
        closed: row.get::<_, i64>(6)? != 0,
    })
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let status: String = row.get(1)?;
    Ok(Job {
        id: row.get(0)?,
        status: JobStatus::parse(&status)?,
        job_name: row.get(2)?,
        task_id: row.get(3)?,
        task_wiki: row.get(4)?,
        started_at: epoch_to_datetime(row.get(5)?),
        ended_at: row.get::<_, Option<i64>>(6)?.map(epoch_to_datetime),
    })
}

fn epoch_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
