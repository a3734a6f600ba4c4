//! Read-only replica mirrors of wiki content databases.
//!
//! Tasks use these for cheap bulk candidate queries (which requested
//! articles exist, which talk pages are oversized and untagged) that
//! would be rude to run through the API. Mirrors are plain SQLite files,
//! one per wiki database name, refreshed externally; a `meta_replica`
//! heartbeat row carries the last sync time.
//!
//! Every caller must check the lag probe first and abstain from a pass
//! when the mirror is stale.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::error::{ClerkError, Result};

/// Mirrors lagging more than this many seconds behind are unusable.
pub const REPLICA_LAG_LIMIT_SECS: f64 = 10.0;

/// A page row from a mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaPage {
    pub id: i64,
    pub title: String,
}

/// Read-only candidate queries against one wiki's mirror.
pub trait ReplicaStore: Send + Sync {
    /// Seconds the mirror is behind the live wiki.
    fn replication_lag(&self) -> Result<f64>;

    /// Which of `titles` exist as namespace-0 non-redirect articles.
    /// Titles go in and come out in display form (spaces).
    fn existing_articles(&self, titles: &[String]) -> Result<Vec<String>>;

    /// Talk pages at least `min_len` bytes long that do not transclude
    /// any of `skip_templates`, largest first.
    fn large_untagged_talk_pages(
        &self,
        min_len: i64,
        skip_templates: &[String],
        limit: usize,
    ) -> Result<Vec<ReplicaPage>>;

    /// Talk pages in a tracking category, in page-id order.
    fn talk_pages_in_category(&self, category: &str, limit: usize) -> Result<Vec<String>>;

    /// Whether the mirror is too stale to act on.
    fn is_lagged(&self) -> Result<bool> {
        Ok(self.replication_lag()? > REPLICA_LAG_LIMIT_SECS)
    }
}

/// Opens replica stores by wiki database name.
pub trait ReplicaFactory: Send + Sync {
    fn open(&self, dbname: &str) -> Result<Box<dyn ReplicaStore>>;
}

/// SQLite-backed [`ReplicaStore`].
pub struct SqliteReplica {
    dbname: String,
    conn: Mutex<Connection>,
}

impl SqliteReplica {
    pub fn open(path: &Path, dbname: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            dbname: dbname.to_owned(),
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    fn open_in_memory(dbname: &str) -> Result<Self> {
        Ok(Self {
            dbname: dbname.to_owned(),
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ClerkError::Lock(format!("replica {}", self.dbname)))
    }
}

impl ReplicaStore for SqliteReplica {
    fn replication_lag(&self) -> Result<f64> {
        let conn = self.lock()?;
        let last_updated: Option<i64> = conn
            .query_row("SELECT last_updated FROM meta_replica LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        match last_updated {
            Some(secs) => Ok((Utc::now().timestamp() - secs).max(0) as f64),
            None => Err(ClerkError::Replica(format!(
                "no heartbeat row in mirror {}",
                self.dbname
            ))),
        }
    }

    fn existing_articles(&self, titles: &[String]) -> Result<Vec<String>> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = titles.iter().map(|t| db_key(t)).collect();
        let placeholders = vec!["?"; keys.len()].join(",");
        let sql = format!(
            "SELECT page_title FROM page
             WHERE page_namespace = 0 AND page_is_redirect = 0
               AND page_title IN ({placeholders})"
        );
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(keys.iter()), |row| row.get::<_, String>(0))?;

        let mut found = Vec::new();
        for row in rows {
            found.push(display_title(&row?));
        }
        Ok(found)
    }

    fn large_untagged_talk_pages(
        &self,
        min_len: i64,
        skip_templates: &[String],
        limit: usize,
    ) -> Result<Vec<ReplicaPage>> {
        let keys: Vec<String> = skip_templates.iter().map(|t| db_key(t)).collect();
        let exclusion = if keys.is_empty() {
            String::new()
        } else {
            let placeholders = vec!["?"; keys.len()].join(",");
            format!(
                " AND page_id NOT IN
                   (SELECT tl_from FROM templatelinks WHERE tl_title IN ({placeholders}))"
            )
        };
        let sql = format!(
            "SELECT page_id, page_title FROM page
             WHERE page_namespace = 1 AND page_len >= {min_len}{exclusion}
             ORDER BY page_len DESC LIMIT {limit}"
        );
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(keys.iter()), |row| {
            Ok(ReplicaPage {
                id: row.get(0)?,
                title: row.get::<_, String>(1)?,
            })
        })?;

        let mut pages = Vec::new();
        for row in rows {
            let mut page = row?;
            page.title = display_title(&page.title);
            pages.push(page);
        }
        Ok(pages)
    }

    fn talk_pages_in_category(&self, category: &str, limit: usize) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT page_title FROM page
             JOIN categorylinks ON cl_from = page_id
             WHERE cl_to = ?1 AND page_namespace = 1
             ORDER BY page_id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![db_key(category), limit as i64], |row| {
            row.get::<_, String>(0)
        })?;

        let mut titles = Vec::new();
        for row in rows {
            titles.push(display_title(&row?));
        }
        Ok(titles)
    }
}

/// Directory of SQLite mirrors, one `<dbname>.db` file each.
pub struct ReplicaPool {
    dir: PathBuf,
}

impl ReplicaPool {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl ReplicaFactory for ReplicaPool {
    fn open(&self, dbname: &str) -> Result<Box<dyn ReplicaStore>> {
        let path = self.dir.join(format!("{dbname}.db"));
        if !path.exists() {
            return Err(ClerkError::Replica(format!(
                "no mirror for {dbname} at {}",
                path.display()
            )));
        }
        Ok(Box::new(SqliteReplica::open(&path, dbname)?))
    }
}

fn db_key(title: &str) -> String {
    title.trim().replace(' ', "_")
}

fn display_title(key: &str) -> String {
    key.replace('_', " ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
