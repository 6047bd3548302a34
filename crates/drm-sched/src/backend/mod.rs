//! Scheduler backends.
//!
//! Each backend is a small capability set: a header template, resource
//! templates, a job-id parser and an array index variable. Backends are
//! picked by [`SchedulerKind`] through [`backend_for`], never by type.
//!
//! | Scheduler | Submit | Token | Array index |
//! |-----------|--------|-------|-------------|
//! | PBS/Torque | `qsub` | `#PBS` | `PBS_ARRAYID` |
//! | SGE | `qsub` | `#$` | (unsupported) |
//! | SLURM | `sbatch` | `#SBATCH` | `SLURM_ARRAY_TASK_ID` |
//! | Local | `bash` | (none) | `DRM_ARRAY_TASK_ID` |

mod local;
mod pbs;
mod sge;
mod slurm;

pub use local::LocalBackend;
pub use pbs::PbsBackend;
pub use sge::SgeBackend;
pub use slurm::SlurmBackend;

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::array::JobArray;
use crate::error::{DrmError, DrmResult};
use crate::resource::ResourceVariant;
use crate::template::{FieldSet, FieldValue, HeaderTemplate};

/// Environment variable naming the SGE parallel environment.
pub const SGE_PE_ENV: &str = "DRM_SGE_PE";

/// Parallel environment used when [`SGE_PE_ENV`] is unset.
pub const DEFAULT_SGE_PE: &str = "smp";

/// The kind of workload manager a backend talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SchedulerKind {
    /// PBS / Torque / PBS Pro.
    Pbs,
    /// Sun Grid Engine.
    Sge,
    /// SLURM.
    Slurm,
    /// Plain `bash` on the current host.
    #[default]
    Local,
}

impl SchedulerKind {
    /// Probe `PATH` for scheduler tools, falling back to local execution.
    pub fn detect() -> Self {
        let kind = if find_executable("pbsnodes").is_some() {
            SchedulerKind::Pbs
        } else if find_executable("qacct").is_some() {
            SchedulerKind::Sge
        } else if find_executable("sbatch").is_some() {
            SchedulerKind::Slurm
        } else {
            SchedulerKind::Local
        };
        tracing::debug!("Detected scheduler: {}", kind);
        kind
    }

    pub fn name(&self) -> &'static str {
        match self {
            SchedulerKind::Pbs => "pbs",
            SchedulerKind::Sge => "sge",
            SchedulerKind::Slurm => "slurm",
            SchedulerKind::Local => "local",
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchedulerKind {
    type Err = DrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pbs" | "torque" => Ok(SchedulerKind::Pbs),
            "sge" => Ok(SchedulerKind::Sge),
            "slurm" => Ok(SchedulerKind::Slurm),
            "local" | "bash" => Ok(SchedulerKind::Local),
            other => Err(DrmError::UnknownScheduler(other.to_string())),
        }
    }
}

/// Backend settings that come from the environment.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// SGE parallel-environment name.
    pub sge_pe_name: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            sge_pe_name: DEFAULT_SGE_PE.to_string(),
        }
    }
}

impl BackendConfig {
    /// Read [`SGE_PE_ENV`], defaulting to [`DEFAULT_SGE_PE`].
    pub fn from_env() -> Self {
        Self::from_pe_var(std::env::var(SGE_PE_ENV).ok())
    }

    /// Build from the raw value of [`SGE_PE_ENV`]; unset or blank means
    /// [`DEFAULT_SGE_PE`].
    pub fn from_pe_var(value: Option<String>) -> Self {
        let sge_pe_name = value
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SGE_PE.to_string());
        Self { sge_pe_name }
    }

    pub fn with_sge_pe_name(mut self, name: impl Into<String>) -> Self {
        self.sge_pe_name = name.into();
        self
    }
}

/// Capabilities a scheduler backend provides to the submitter.
pub trait Backend: Send + Sync + fmt::Debug {
    fn kind(&self) -> SchedulerKind;

    /// Binary invoked with the script path as its sole argument.
    fn submit_program(&self) -> &str;

    /// Job-level directives (name, logs, holds, array bounds).
    fn header(&self) -> &HeaderTemplate;

    /// Resource directives for the given request kind.
    fn resource_template(&self, variant: ResourceVariant) -> &HeaderTemplate;

    /// Environment variable holding the array task index, if arrays are
    /// supported.
    fn array_index_var(&self) -> Option<&str>;

    /// Extract the scheduler-assigned id from submit stdout.
    fn parse_job_id(&self, stdout: &str) -> Option<String>;

    /// Add backend-owned values (e.g. a parallel environment) before rendering.
    fn extend_fields(&self, _fields: &mut FieldSet) {}

    /// Render an array body.
    fn render_array(&self, array: &JobArray) -> DrmResult<String> {
        match self.array_index_var() {
            Some(var) => Ok(array.render_branches(var)),
            None => Err(DrmError::Unsupported(format!(
                "job arrays on {}",
                self.kind()
            ))),
        }
    }
}

/// Construct the backend for `kind`.
pub fn backend_for(kind: SchedulerKind, config: &BackendConfig) -> Arc<dyn Backend> {
    match kind {
        SchedulerKind::Pbs => Arc::new(PbsBackend),
        SchedulerKind::Sge => Arc::new(SgeBackend::new(config.sge_pe_name.clone())),
        SchedulerKind::Slurm => Arc::new(SlurmBackend),
        SchedulerKind::Local => Arc::new(LocalBackend),
    }
}

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// First run of digits in `stdout`.
pub(crate) fn first_digits(stdout: &str) -> Option<String> {
    DIGITS.find(stdout).map(|m| m.as_str().to_string())
}

/// Join a non-empty id list; `None` for an empty one.
pub(crate) fn join_ids(value: &FieldValue, separator: &str) -> Option<String> {
    value
        .as_ids()
        .filter(|ids| !ids.is_empty())
        .map(|ids| ids.join(separator))
}

fn find_executable(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    find_in_path(&path, name)
}

/// First executable `name` in a `PATH`-style list of directories.
fn find_in_path(path: &OsStr, name: &str) -> Option<PathBuf> {
    std::env::split_paths(path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_kind_from_str() {
        assert_eq!("slurm".parse::<SchedulerKind>().unwrap(), SchedulerKind::Slurm);
        assert_eq!("PBS".parse::<SchedulerKind>().unwrap(), SchedulerKind::Pbs);
        assert_eq!("torque".parse::<SchedulerKind>().unwrap(), SchedulerKind::Pbs);
        assert_eq!("sge".parse::<SchedulerKind>().unwrap(), SchedulerKind::Sge);
        assert_eq!("bash".parse::<SchedulerKind>().unwrap(), SchedulerKind::Local);
        assert!(matches!(
            "lsf".parse::<SchedulerKind>(),
            Err(DrmError::UnknownScheduler(_))
        ));
    }

    #[test]
    fn test_backend_for_kind() {
        let config = BackendConfig::default();
        for kind in [
            SchedulerKind::Pbs,
            SchedulerKind::Sge,
            SchedulerKind::Slurm,
            SchedulerKind::Local,
        ] {
            assert_eq!(backend_for(kind, &config).kind(), kind);
        }
    }

    #[test]
    fn test_first_digits() {
        assert_eq!(
            first_digits("Submitted batch job 12345\n"),
            Some("12345".to_string())
        );
        assert_eq!(
            first_digits("Your job 77 (\"x\") has been submitted"),
            Some("77".to_string())
        );
        assert_eq!(first_digits("no id here"), None);
    }

    #[test]
    fn test_sge_unsupported_arrays() {
        let backend = backend_for(SchedulerKind::Sge, &BackendConfig::default());
        let array = JobArray::from_jobs(["a"]);
        assert!(matches!(
            backend.render_array(&array),
            Err(DrmError::Unsupported(_))
        ));
    }

    #[test]
    fn test_backend_config_default_pe() {
        assert_eq!(BackendConfig::default().sge_pe_name, "smp");
        assert_eq!(
            BackendConfig::default().with_sge_pe_name("mpi").sge_pe_name,
            "mpi"
        );
    }

    #[test]
    fn test_backend_config_from_pe_var() {
        assert_eq!(
            BackendConfig::from_pe_var(Some("mpi".to_string())).sge_pe_name,
            "mpi"
        );
        assert_eq!(
            BackendConfig::from_pe_var(Some(" orte ".to_string())).sge_pe_name,
            "orte"
        );
        assert_eq!(
            BackendConfig::from_pe_var(Some("   ".to_string())).sge_pe_name,
            DEFAULT_SGE_PE
        );
        assert_eq!(BackendConfig::from_pe_var(None).sge_pe_name, DEFAULT_SGE_PE);
    }

    #[cfg(unix)]
    #[test]
    fn test_find_in_path_requires_execute_bit() {
        use std::os::unix::fs::PermissionsExt;

        let plain = tempfile::tempdir().unwrap();
        let runnable = tempfile::tempdir().unwrap();
        for dir in [plain.path(), runnable.path()] {
            std::fs::write(dir.join("sbatch"), "#!/bin/sh\n").unwrap();
        }
        std::fs::set_permissions(
            plain.path().join("sbatch"),
            std::fs::Permissions::from_mode(0o644),
        )
        .unwrap();
        std::fs::set_permissions(
            runnable.path().join("sbatch"),
            std::fs::Permissions::from_mode(0o755),
        )
        .unwrap();

        let only_plain = std::env::join_paths([plain.path()]).unwrap();
        assert_eq!(find_in_path(&only_plain, "sbatch"), None);

        let both = std::env::join_paths([plain.path(), runnable.path()]).unwrap();
        assert_eq!(
            find_in_path(&both, "sbatch"),
            Some(runnable.path().join("sbatch"))
        );
        assert_eq!(find_in_path(&both, "qacct"), None);
    }
}
