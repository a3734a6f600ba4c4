//! The shipped clerking tasks, one module per task number.
//!
//! Each module exposes a `task()` constructor returning the wired-up
//! [`crate::task::Task`]; [`crate::task::TaskRegistry::builtin`] lists
//! them all.

pub mod archive_setup;
pub mod bot_status;
pub mod dyk_entries;
pub mod filter_reports;
pub mod requested_articles;
pub mod steward_requests;
