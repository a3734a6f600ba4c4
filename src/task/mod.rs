//! Task model: trials, remote configuration and the run contract.

pub mod registry;
pub mod settings;
pub mod task;
pub mod trial;

pub use registry::TaskRegistry;
pub use settings::{CONFIG_TTL, ConfigMap, TaskSettings, parse_configuration};
pub use task::{ReloadEffect, RunContext, Task, TaskLogic, TaskMeta};
pub use trial::Trial;
