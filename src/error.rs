//! Error types for the wikiclerk engine.

/// Top-level error type for the bot platform.
#[derive(Debug, thiserror::Error)]
pub enum ClerkError {
    /// Process settings or remote task configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// A required key is missing from a task's configuration page.
    #[error("missing configuration key '{key}' for task {task}")]
    ConfigKey { task: u32, key: String },

    /// Job/trial store error.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A shared-state mutex was poisoned.
    #[error("lock poisoned: {0}")]
    Lock(String),

    /// Read-replica error (missing mirror, bad query).
    #[error("replica error: {0}")]
    Replica(String),

    /// HTTP transport error talking to the wiki.
    #[error("http error: {0}")]
    Http(String),

    /// The remote API answered with an error payload.
    #[error("api error {code}: {info}")]
    Api { code: String, info: String },

    /// Change stream transport error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Task lifecycle misuse (run before activate, duplicate number).
    #[error("task error: {0}")]
    Task(String),

    /// Manual runs are not supported by this task.
    #[error("task {0} does not support manual runs")]
    ManualRunUnsupported(u32),

    /// The run was interrupted by a signal.
    #[error("interrupted")]
    Interrupted,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ClerkError>;
