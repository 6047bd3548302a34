//! Error handling for batch submission.

use thiserror::Error;

/// Result type for submission and polling operations.
pub type DrmResult<T> = Result<T, DrmError>;

/// Errors that can occur while rendering, submitting or polling jobs.
#[derive(Error, Debug)]
pub enum DrmError {
    /// The scheduler binary is not installed on this host.
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },

    /// A scheduler command ran but exited unsuccessfully.
    #[error("Command failed: {command} (exit status {status}) - {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    /// A scheduler command did not finish in time.
    #[error("Command timeout: {0}")]
    Timeout(String),

    /// A job name was submitted twice against the same registry.
    #[error("Name {name} already registered with job id {existing}")]
    DuplicateName { name: String, existing: String },

    /// The backend cannot express the requested job shape.
    #[error("Unsupported by backend: {0}")]
    Unsupported(String),

    /// Accounting output could not be parsed.
    #[error("Accounting parse error: {0}")]
    AccountingParse(String),

    /// A wall-clock string did not match HH:MM:SS, HH:MM or MM.
    #[error("Invalid walltime: {0}")]
    InvalidWalltime(String),

    /// A timestamp was not `YYYY-MM-DDTHH:MM:SS` or `YYYY-MM-DD`.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Unknown scheduler name.
    #[error("Unknown scheduler: {0}")]
    UnknownScheduler(String),

    /// Malformed pipeline document.
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl DrmError {
    /// Whether this error means the scheduler binary is absent.
    pub fn is_command_not_found(&self) -> bool {
        matches!(self, DrmError::CommandNotFound { .. })
    }
}
