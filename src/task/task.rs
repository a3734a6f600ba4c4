//! The task type: identity, edit authorization, configuration access and
//! the run contract.
//!
//! A [`Task`] is constructed pure (no I/O), then [`Task::activate`]d
//! against the job store, which loads its approval flag and any open
//! trial. The per-task behavior lives behind [`TaskLogic`]; everything
//! generic (authorization, trial bookkeeping, configuration reload
//! dispatch) lives here.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ClerkError, Result};
use crate::store::TaskStore;
use crate::store::replica::ReplicaFactory;
use crate::task::settings::{ConfigMap, TaskSettings};
use crate::task::trial::Trial;
use crate::wiki::api::WikiApi;

/// Static identity of a task.
#[derive(Debug, Clone)]
pub struct TaskMeta {
    /// Stable task number; unique across the registry.
    pub number: u32,
    pub name: String,
    /// Site code, e.g. `en` or `meta`.
    pub site: String,
    /// Site family, e.g. `wikipedia` or `meta`.
    pub family: String,
    /// Continuous tasks watch a change stream; bounded tasks do one pass.
    pub continuous: bool,
    pub supports_manual_run: bool,
    /// Wiki page holding this task's JSON configuration.
    pub configuration_page: Option<String>,
}

impl TaskMeta {
    /// Database name of the task's wiki (`en` -> `enwiki`).
    pub fn dbname(&self) -> String {
        crate::wiki::pool::dbname(&self.site)
    }
}

/// What a configuration reload asks of the surrounding run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReloadEffect {
    #[default]
    None,
    /// The watched page moved; the continuous loop should drop its
    /// stream and let the process-level restart pick up the new page.
    RestartStream,
}

/// Collaborators handed to a task body for one run.
pub struct RunContext {
    pub wiki: Arc<dyn WikiApi>,
    pub replicas: Arc<dyn ReplicaFactory>,
    stop: Arc<AtomicBool>,
    confirmer: Arc<dyn Fn(&str) -> bool + Send + Sync>,
}

impl RunContext {
    pub fn new(wiki: Arc<dyn WikiApi>, replicas: Arc<dyn ReplicaFactory>) -> Self {
        Self {
            wiki,
            replicas,
            stop: Arc::new(AtomicBool::new(false)),
            confirmer: Arc::new(stdin_confirm),
        }
    }

    /// Wire the context to a shared stop flag (normally the signal
    /// handler's flag from [`crate::interrupt::install`]).
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Replace the interactive confirmation prompt (tests, headless runs).
    pub fn with_confirmer(
        mut self,
        confirmer: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.confirmer = Arc::new(confirmer);
        self
    }

    /// Whether an interrupt was requested.
    pub fn interrupted(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Error out of a loop when an interrupt was requested.
    pub fn check_interrupt(&self) -> Result<()> {
        if self.interrupted() {
            return Err(ClerkError::Interrupted);
        }
        Ok(())
    }

    /// Ask the operator to confirm an edit (manual runs).
    pub fn confirm(&self, prompt: &str) -> bool {
        (self.confirmer)(prompt)
    }
}

fn stdin_confirm(prompt: &str) -> bool {
    print!("{prompt} [y/N] ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim(), "y" | "Y" | "yes")
}

/// Per-task behavior.
pub trait TaskLogic: Send + Sync {
    /// One full pass for bounded tasks; for continuous tasks, block on
    /// the change stream until it ends or a reload effect stops it.
    fn run(&self, task: &mut Task, ctx: &RunContext) -> Result<()>;

    /// Built-in defaults merged under the on-wiki configuration.
    fn default_configuration(&self) -> ConfigMap {
        ConfigMap::new()
    }

    /// React to a configuration reload. The first load of a process
    /// arrives with an empty `old`.
    fn configuration_reloaded(&self, old: &ConfigMap, new: &ConfigMap) -> ReloadEffect {
        let _ = (old, new);
        ReloadEffect::None
    }
}

/// A registered bot task.
pub struct Task {
    meta: TaskMeta,
    logic: Arc<dyn TaskLogic>,
    settings: TaskSettings,
    store: Option<Arc<TaskStore>>,
    approved: bool,
    trial: Option<Trial>,
    manual_run: bool,
    param: Option<String>,
    pending_effect: ReloadEffect,
}

impl Task {
    /// Construct without touching any collaborator.
    pub fn new(meta: TaskMeta, logic: Arc<dyn TaskLogic>) -> Self {
        let mut settings = TaskSettings::new();
        if let Some(page) = &meta.configuration_page {
            settings.register(page.clone());
        }
        Self {
            meta,
            logic,
            settings,
            store: None,
            approved: false,
            trial: None,
            manual_run: false,
            param: None,
            pending_effect: ReloadEffect::None,
        }
    }

    pub fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    pub fn number(&self) -> u32 {
        self.meta.number
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn approved(&self) -> bool {
        self.approved
    }

    pub fn trial(&self) -> Option<&Trial> {
        self.trial.as_ref()
    }

    pub fn activated(&self) -> bool {
        self.store.is_some()
    }

    /// Whether the current run is a manual one (affects confirmation
    /// prompts in task bodies).
    pub fn manual_run(&self) -> bool {
        self.manual_run
    }

    pub fn param(&self) -> Option<&str> {
        self.param.as_deref()
    }

    pub fn set_param(&mut self, param: Option<String>) {
        self.param = param;
    }

    /// Register with the store and load approval + the open trial.
    ///
    /// A trial already expired by age or edits is dropped here instead
    /// of being carried into the run.
    pub fn activate(&mut self, store: Arc<TaskStore>) -> Result<()> {
        store.register_task(self.meta.number, &self.meta.name)?;
        self.approved = store.is_approved(self.meta.number)?;
        let now = Utc::now();
        self.trial = store
            .latest_trial(self.meta.number)?
            .filter(|t| t.is_active(now));
        self.store = Some(store);
        info!(
            task = self.meta.number,
            name = %self.meta.name,
            approved = self.approved,
            in_trial = self.trial.is_some(),
            "task activated"
        );
        Ok(())
    }

    fn store(&self) -> Result<&Arc<TaskStore>> {
        self.store.as_ref().ok_or_else(|| {
            ClerkError::Task(format!(
                "task {} must be activated before use",
                self.meta.number
            ))
        })
    }

    // -- authorization ----------------------------------------------------

    /// Approved tasks edit with the bot flag; trial edits stay visible.
    pub fn should_use_bot_flag(&self) -> bool {
        self.approved
    }

    /// The single authority on whether the task may edit right now.
    ///
    /// An expired trial is cleared and answers `false` once; afterwards
    /// the approval flag decides alone.
    pub fn should_edit(&mut self) -> bool {
        let now = Utc::now();
        match &self.trial {
            Some(trial) if trial.is_active(now) => true,
            Some(trial) => {
                info!(
                    task = self.meta.number,
                    trial = trial.id,
                    "trial expired, clearing"
                );
                self.trial = None;
                false
            }
            None => self.approved,
        }
    }

    /// Record one edit against the active trial: store first, then the
    /// local counter. A no-op without an active trial.
    pub fn record_trial_edit(&mut self) -> Result<()> {
        let now = Utc::now();
        let Some(trial) = self.trial.as_ref() else {
            return Ok(());
        };
        if !trial.is_active(now) {
            return Ok(());
        }
        let trial_id = trial.id;
        self.store()?.record_trial_edit(trial_id)?;
        if let Some(trial) = self.trial.as_mut() {
            trial.record_edit();
            debug!(
                task = self.meta.number,
                trial = trial_id,
                edits_done = trial.edits_done,
                "trial edit recorded"
            );
        }
        Ok(())
    }

    // -- configuration ----------------------------------------------------

    /// Point the task at a (new) configuration page.
    pub fn register_task_configuration(&mut self, page: impl Into<String>) {
        self.settings.register(page);
    }

    /// Drop the cached configuration so the next access refetches.
    pub fn invalidate_configuration(&mut self) {
        self.settings.invalidate();
    }

    fn reload_configuration(&mut self, wiki: &dyn WikiApi) -> Result<()> {
        if let Some((old, new)) = self.settings.reload_if_due(wiki)? {
            let effect = self.logic.configuration_reloaded(&old, &new);
            if effect != ReloadEffect::None {
                debug!(task = self.meta.number, ?effect, "configuration reload effect");
                self.pending_effect = effect;
            }
        }
        Ok(())
    }

    /// Merge defaults into the live configuration (loading it first if
    /// needed). Keys set on the wiki page always win.
    pub fn merge_task_configuration(
        &mut self,
        wiki: &dyn WikiApi,
        defaults: &ConfigMap,
    ) -> Result<()> {
        self.reload_configuration(wiki)?;
        self.settings.merge_defaults(defaults);
        Ok(())
    }

    /// One configuration value. Missing keys are a hard error; merge
    /// defaults first.
    pub fn configuration_value(&mut self, wiki: &dyn WikiApi, key: &str) -> Result<Value> {
        self.reload_configuration(wiki)?;
        self.settings.get(key).cloned().ok_or_else(|| {
            ClerkError::ConfigKey {
                task: self.meta.number,
                key: key.to_owned(),
            }
        })
    }

    /// The whole live configuration map.
    pub fn configuration_map(&mut self, wiki: &dyn WikiApi) -> Result<ConfigMap> {
        self.reload_configuration(wiki)?;
        Ok(self.settings.map().cloned().unwrap_or_default())
    }

    /// The live configuration with the task's own defaults merged under
    /// it, exactly as a run would see it.
    pub fn merged_configuration(&mut self, wiki: &dyn WikiApi) -> Result<ConfigMap> {
        let logic = Arc::clone(&self.logic);
        self.merge_task_configuration(wiki, &logic.default_configuration())?;
        Ok(self.settings.map().cloned().unwrap_or_default())
    }

    /// Consume the effect requested by the most recent reload hook.
    pub fn take_reload_effect(&mut self) -> ReloadEffect {
        std::mem::take(&mut self.pending_effect)
    }

    // Typed configuration accessors for task bodies.

    pub fn config_str(&mut self, wiki: &dyn WikiApi, key: &str) -> Result<String> {
        let value = self.configuration_value(wiki, key)?;
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| self.config_type_error(key, "a string"))
    }

    pub fn config_bool(&mut self, wiki: &dyn WikiApi, key: &str) -> Result<bool> {
        let value = self.configuration_value(wiki, key)?;
        value
            .as_bool()
            .ok_or_else(|| self.config_type_error(key, "a boolean"))
    }

    pub fn config_i64(&mut self, wiki: &dyn WikiApi, key: &str) -> Result<i64> {
        let value = self.configuration_value(wiki, key)?;
        value
            .as_i64()
            .ok_or_else(|| self.config_type_error(key, "an integer"))
    }

    pub fn config_str_list(&mut self, wiki: &dyn WikiApi, key: &str) -> Result<Vec<String>> {
        let value = self.configuration_value(wiki, key)?;
        let items = value
            .as_array()
            .ok_or_else(|| self.config_type_error(key, "a list of strings"))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| self.config_type_error(key, "a list of strings"))
            })
            .collect()
    }

    pub fn config_object(&mut self, wiki: &dyn WikiApi, key: &str) -> Result<ConfigMap> {
        let value = self.configuration_value(wiki, key)?;
        value
            .as_object()
            .cloned()
            .ok_or_else(|| self.config_type_error(key, "an object"))
    }

    fn config_type_error(&self, key: &str, expected: &str) -> ClerkError {
        ClerkError::Config(format!(
            "task {}: configuration key '{key}' must be {expected}",
            self.meta.number
        ))
    }

    // -- running ----------------------------------------------------------

    /// Execute the task body. Requires a prior [`Task::activate`].
    pub fn run(&mut self, ctx: &RunContext) -> Result<()> {
        self.store()?;
        info!(task = self.meta.number, name = %self.meta.name, "task run starting");
        let logic = Arc::clone(&self.logic);
        logic.run(self, ctx)
    }

    /// Manual-run entry point: checked before any task logic executes.
    pub fn do_manual_run(&mut self, ctx: &RunContext) -> Result<()> {
        if !self.meta.supports_manual_run {
            return Err(ClerkError::ManualRunUnsupported(self.meta.number));
        }
        self.manual_run = true;
        let result = self.run(ctx);
        self.manual_run = false;
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
