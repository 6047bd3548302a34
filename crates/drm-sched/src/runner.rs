//! External command execution.

use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::process::Command;

use crate::error::{DrmError, DrmResult};

/// Runs scheduler commands and returns their stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Run `program` with `args`.
    ///
    /// Must return [`DrmError::CommandNotFound`] when `program` is not
    /// installed; callers rely on it to fall back gracefully.
    async fn run(&self, program: &str, args: &[String]) -> DrmResult<String>;
}

/// Runs commands on this host through `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Let commands run for as long as they need, e.g. local jobs that
    /// execute inside the submit call.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> DrmResult<String> {
        tracing::debug!("Running {} {}", program, args.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child).await.map_err(|_| {
                DrmError::Timeout(format!(
                    "{} timed out after {}s",
                    program,
                    limit.as_secs()
                ))
            })?,
            None => child.await,
        }
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DrmError::CommandNotFound {
                command: program.to_string(),
            },
            _ => DrmError::Io(e),
        })?;

        if !output.status.success() {
            return Err(DrmError::CommandFailed {
                command: program.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// In-memory runner for tests and dry runs.
///
/// Programs with a canned response return it; every other call returns the
/// next value of a counter starting at 1, like a scheduler handing out ids.
#[derive(Debug)]
pub struct MockRunner {
    counter: AtomicU64,
    responses: FxHashMap<String, String>,
    missing: bool,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self {
            counter: AtomicU64::new(1),
            responses: FxHashMap::default(),
            missing: false,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start job ids at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            counter: AtomicU64::new(first),
            ..Self::default()
        }
    }

    /// A runner for a host without any scheduler installed.
    pub fn missing() -> Self {
        Self {
            missing: true,
            ..Self::default()
        }
    }

    /// Return `stdout` whenever `program` is run.
    pub fn with_response(mut self, program: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.responses.insert(program.into(), stdout.into());
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, program: &str, args: &[String]) -> DrmResult<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((program.to_string(), args.to_vec()));

        if self.missing {
            return Err(DrmError::CommandNotFound {
                command: program.to_string(),
            });
        }

        if let Some(stdout) = self.responses.get(program) {
            return Ok(stdout.clone());
        }

        Ok(self.counter.fetch_add(1, Ordering::SeqCst).to_string())
    }
}
