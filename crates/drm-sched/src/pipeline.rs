//! YAML pipeline files.
//!
//! ```yaml
//! scheduler: slurm
//! log_dir: logs
//! jobs:
//!   - name: align
//!     command: bwa mem ref.fa reads.fq > out.sam
//!     resource: { memory_gb: 8, workers: 4, time: "02:00:00" }
//!   - name: index
//!     hold: align
//!     array: [samtools index a.bam, samtools index b.bam]
//! wait:
//!   interval_secs: 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::array::JobArray;
use crate::backend::SchedulerKind;
use crate::error::{DrmError, DrmResult};
use crate::registry::Names;
use crate::resource::{MpiResourceSpec, Resource, ResourceSpec};
use crate::submitter::{JobBody, JobInfo, SubmitOptions, Submitter, SubmitterConfig};
use crate::waiter::Waiter;

/// One job of a pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineJob {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub array: Option<JobArray>,
    #[serde(default)]
    pub hold: Names,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub resource: Option<ResourceSpec>,
    #[serde(default)]
    pub mpi: Option<MpiResourceSpec>,
}

impl PipelineJob {
    fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) => format!("job '{name}'"),
            None => format!("job #{}", index + 1),
        }
    }

    fn validate(&self, index: usize) -> DrmResult<()> {
        if self.command.is_some() == self.array.is_some() {
            return Err(DrmError::Pipeline(format!(
                "{} needs exactly one of `command` or `array`",
                self.label(index)
            )));
        }
        if self.resource.is_some() && self.mpi.is_some() {
            return Err(DrmError::Pipeline(format!(
                "{} sets both `resource` and `mpi`",
                self.label(index)
            )));
        }
        Ok(())
    }

    pub fn body(&self) -> JobBody {
        match (&self.command, &self.array) {
            (Some(command), _) => JobBody::Script(command.clone()),
            (None, Some(array)) => JobBody::Array(array.clone()),
            (None, None) => JobBody::Script(String::new()),
        }
    }

    pub fn options(&self) -> SubmitOptions {
        let resource: Option<Resource> = match (&self.mpi, &self.resource) {
            (Some(mpi), _) => Some(mpi.clone().into()),
            (None, Some(spec)) => Some(spec.clone().into()),
            (None, None) => None,
        };
        SubmitOptions {
            name: self.name.clone(),
            hold: self.hold.clone(),
            work_dir: self.work_dir.clone(),
            resource,
        }
    }
}

/// Polling settings for `drm run --wait`.
#[derive(Debug, Clone, Deserialize)]
pub struct WaitSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_interval_secs() -> u64 {
    60
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: None,
        }
    }
}

impl WaitSettings {
    pub fn waiter(&self, job_ids: Vec<String>) -> Waiter {
        let waiter = Waiter::new(job_ids).with_interval(Duration::from_secs(self.interval_secs));
        match self.timeout_secs {
            Some(secs) => waiter.with_timeout(Duration::from_secs(secs)),
            None => waiter,
        }
    }
}

/// An ordered list of jobs submitted through one registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pipeline {
    #[serde(default)]
    pub scheduler: Option<String>,
    #[serde(default)]
    pub script_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    pub jobs: Vec<PipelineJob>,
    #[serde(default)]
    pub wait: Option<WaitSettings>,
}

impl Pipeline {
    pub fn from_yaml(text: &str) -> DrmResult<Self> {
        let pipeline: Pipeline = serde_yaml_ng::from_str(text)?;
        pipeline.validate()?;
        Ok(pipeline)
    }

    pub async fn load(path: impl AsRef<Path>) -> DrmResult<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_yaml(&text)
    }

    /// Job bodies and resource blocks are well formed and names are unique.
    pub fn validate(&self) -> DrmResult<()> {
        let mut seen = FxHashSet::default();
        for (index, job) in self.jobs.iter().enumerate() {
            job.validate(index)?;
            if let Some(name) = &job.name {
                if !seen.insert(name.as_str()) {
                    return Err(DrmError::Pipeline(format!(
                        "job name '{name}' is used more than once"
                    )));
                }
            }
        }
        if let Some(scheduler) = &self.scheduler {
            scheduler.parse::<SchedulerKind>()?;
        }
        Ok(())
    }

    /// Scheduler named in the file, if any.
    pub fn scheduler_kind(&self) -> DrmResult<Option<SchedulerKind>> {
        self.scheduler.as_deref().map(str::parse).transpose()
    }

    /// Directories from the file, relative paths resolved against `base`.
    pub fn submitter_config(&self, base: &Path) -> SubmitterConfig {
        let mut config = SubmitterConfig::new();
        if let Some(dir) = &self.script_dir {
            config = config.with_script_dir(base.join(dir));
        }
        if let Some(dir) = &self.log_dir {
            config = config.with_log_dir(base.join(dir));
        }
        config
    }

    /// Submit every job in order. Jobs with empty bodies are skipped.
    pub async fn submit(&self, submitter: &Submitter) -> DrmResult<Vec<JobInfo>> {
        self.validate()?;

        let mut submitted = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            if let Some(info) = submitter.submit(job.body(), job.options()).await? {
                submitted.push(info);
            }
        }
        tracing::info!("Submitted {} of {} pipeline jobs", submitted.len(), self.jobs.len());
        Ok(submitted)
    }
}
