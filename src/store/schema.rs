//! SQLite DDL for the job store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

/// Schema version stamped into fresh databases.
pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL for the job store.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- WAL keeps readers usable while a job row is being written.
PRAGMA journal_mode = WAL;

PRAGMA foreign_keys = ON;

-- Schema version tracking.
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Registered tasks: id is the stable task number, approval is flipped
-- by operators, never by the engine.
CREATE TABLE IF NOT EXISTS tasks (
    id       INTEGER PRIMARY KEY,
    name     TEXT NOT NULL,
    approved INTEGER NOT NULL DEFAULT 0
);

-- Edit trials. Timestamps are epoch seconds.
CREATE TABLE IF NOT EXISTS task_trials (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id    INTEGER NOT NULL,
    created_at INTEGER NOT NULL DEFAULT 0,
    max_days   INTEGER NOT NULL DEFAULT -1,   -- negative = unlimited
    max_edits  INTEGER NOT NULL DEFAULT 0,    -- zero = unlimited
    edits_done INTEGER NOT NULL DEFAULT 0,
    closed     INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_trials_task ON task_trials(task_id, created_at);

-- Job run records for bounded executions.
CREATE TABLE IF NOT EXISTS jobs (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    status     TEXT NOT NULL,                 -- RUNNING / DONE / FAIL
    job_name   TEXT NOT NULL,
    task_id    INTEGER NOT NULL,
    task_wiki  TEXT NOT NULL,
    started_at INTEGER NOT NULL DEFAULT 0,
    ended_at   INTEGER                         -- NULL while RUNNING
);

CREATE INDEX IF NOT EXISTS idx_jobs_task ON jobs(task_id, started_at);
"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times. Seeds the schema version on fresh
/// databases without overwriting an existing stamp.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read the schema version, `None` on a pre-version database.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let value: String = row.get(0)?;
            Ok(value.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
