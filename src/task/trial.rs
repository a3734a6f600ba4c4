//! Edit trials: time- or volume-bounded permission to edit.
//!
//! A trial row lives in the job store; this type carries it in memory and
//! answers the activity question. Expiry is decided at read time only.
//! Nothing here writes `closed` back; closing a trial is an
//! administrative action outside the engine.

use chrono::{DateTime, Duration, Utc};

/// One edit trial granted to a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trial {
    pub id: i64,
    pub task_id: u32,
    pub created_at: DateTime<Utc>,
    /// Trial length in days; negative means unlimited.
    pub max_days: i64,
    /// Edit budget; zero means unlimited.
    pub max_edits: i64,
    pub edits_done: i64,
    pub closed: bool,
}

impl Trial {
    /// Whether the trial still authorizes edits at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.closed && !self.expired_by_age(now) && !self.exhausted()
    }

    /// Age expiry: strictly more than `max_days` days since creation.
    pub fn expired_by_age(&self, now: DateTime<Utc>) -> bool {
        if self.max_days < 0 {
            return false;
        }
        now.signed_duration_since(self.created_at) > Duration::days(self.max_days)
    }

    /// Edit-budget exhaustion.
    pub fn exhausted(&self) -> bool {
        self.max_edits != 0 && self.edits_done >= self.max_edits
    }

    /// Bump the local edit counter. The store-side counter is incremented
    /// separately (and first) by the caller.
    pub fn record_edit(&mut self) {
        self.edits_done += 1;
    }
}
