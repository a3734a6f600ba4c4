//! Wikiclerk: a maintenance bot platform for MediaWiki wikis.
//!
//! The engine runs numbered clerking tasks against their wikis under an
//! approval/trial policy, recording every bounded run as a job.
//!
//! # Architecture
//!
//! - **Tasks**: per-task behavior behind [`task::TaskLogic`]; the generic
//!   lifecycle (approval, trials, remote configuration) lives in
//!   [`task::Task`], and [`task::TaskRegistry`] lists the shipped tasks
//! - **Wiki access**: the [`wiki::api::WikiApi`] contract, implemented
//!   over the Action API by [`wiki::HttpWiki`] and shared through
//!   [`wiki::WikiPool`]
//! - **Store**: SQLite job and trial records in [`store::TaskStore`],
//!   read-only replica mirrors in [`store::replica`]
//! - **Runner**: [`runner::run_task`] wraps bounded runs in job records
//!
//! The `wikiclerk` binary wires these together from [`settings`].

pub mod clerks;
pub mod delay;
pub mod error;
pub mod interrupt;
pub mod paths;
pub mod runner;
pub mod settings;
pub mod store;
pub mod task;
pub mod wiki;

pub use error::{ClerkError, Result};
pub use settings::BotSettings;
pub use store::TaskStore;
pub use task::{Task, TaskRegistry};
