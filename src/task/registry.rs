//! Explicit, insertion-ordered task registry.
//!
//! Tasks are listed by hand in [`TaskRegistry::builtin`]; there is no
//! directory scanning or other implicit discovery.

use crate::error::{ClerkError, Result};
use crate::task::task::Task;

#[derive(Default)]
pub struct TaskRegistry {
    tasks: Vec<Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Every shipped task, in listing order.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(crate::clerks::filter_reports::task())?;
        registry.register(crate::clerks::requested_articles::task())?;
        registry.register(crate::clerks::bot_status::task())?;
        registry.register(crate::clerks::archive_setup::task())?;
        registry.register(crate::clerks::steward_requests::task())?;
        registry.register(crate::clerks::dyk_entries::task())?;
        Ok(registry)
    }

    /// Add a task; its number must be unused.
    pub fn register(&mut self, task: Task) -> Result<()> {
        if self.get(task.number()).is_some() {
            return Err(ClerkError::Task(format!(
                "task number {} is already registered",
                task.number()
            )));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn all(&self) -> &[Task] {
        &self.tasks
    }

    pub fn all_mut(&mut self) -> &mut [Task] {
        &mut self.tasks
    }

    pub fn get(&self, number: u32) -> Option<&Task> {
        self.tasks.iter().find(|task| task.number() == number)
    }

    pub fn get_mut(&mut self, number: u32) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.number() == number)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
