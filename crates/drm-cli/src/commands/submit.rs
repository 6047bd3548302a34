//! Submit command implementation.
//!
//! Renders one job script and hands it to the scheduler.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Args};
use console::style;

use drm_sched::{
    JobBody, MpiResourceSpec, Resource, ResourceSpec, SubmitOptions, SubmitterConfig,
    parse_walltime,
};

use super::common::{create_submitter, load_array, print_submitted, scheduler_kind};

/// Arguments of `drm submit`.
#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("body")
        .required(true)
        .args(["command", "file", "array"]),
))]
pub struct SubmitArgs {
    /// Command line to run
    #[arg(short, long)]
    pub command: Option<String>,

    /// Script whose contents become the job body
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// File with one array task per line
    #[arg(long)]
    pub array: Option<PathBuf>,

    /// Job name, usable in later holds
    #[arg(short, long)]
    pub name: Option<String>,

    /// Job IDs this job waits for (repeatable)
    #[arg(long)]
    pub hold: Vec<String>,

    /// Working directory (default: current directory)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Memory in GB
    #[arg(long)]
    pub mem: Option<f64>,

    /// Worker (core) count
    #[arg(long)]
    pub workers: Option<u32>,

    /// Wall time limit (HH:MM:SS, HH:MM or minutes)
    #[arg(long)]
    pub time: Option<String>,

    /// Hardware or feature constraint
    #[arg(long)]
    pub constraint: Option<String>,

    /// Processes per node; requests an MPI layout
    #[arg(long)]
    pub ppn: Option<u32>,

    /// Scheduler (pbs, sge, slurm, local); detected if omitted
    #[arg(long, env = "DRM_SCHEDULER")]
    pub scheduler: Option<String>,

    /// Directory for generated scripts
    #[arg(long)]
    pub script_dir: Option<PathBuf>,

    /// Directory for job output
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl SubmitArgs {
    fn body(&self) -> Result<JobBody> {
        if let Some(command) = &self.command {
            return Ok(JobBody::Script(command.clone()));
        }
        if let Some(path) = &self.file {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read script: {}", path.display()))?;
            return Ok(JobBody::Script(text));
        }
        match &self.array {
            Some(path) => Ok(JobBody::Array(load_array(path)?)),
            None => anyhow::bail!("One of --command, --file or --array is required"),
        }
    }

    /// A resource block only when some resource flag was given.
    fn resource(&self) -> Result<Option<Resource>> {
        if self.mem.is_none()
            && self.workers.is_none()
            && self.time.is_none()
            && self.constraint.is_none()
            && self.ppn.is_none()
        {
            return Ok(None);
        }

        let mut spec = ResourceSpec::new();
        if let Some(mem) = self.mem {
            spec = spec.with_memory_gb(mem);
        }
        if let Some(workers) = self.workers {
            spec = spec.with_workers(workers);
        }
        if let Some(time) = &self.time {
            spec = spec.with_time(parse_walltime(time)?);
        }
        if let Some(constraint) = &self.constraint {
            spec = spec.with_constraint(constraint.as_str());
        }

        Ok(Some(match self.ppn {
            Some(ppn) => MpiResourceSpec::new().with_base(spec).with_ppn(ppn).into(),
            None => spec.into(),
        }))
    }

    fn options(&self) -> Result<SubmitOptions> {
        Ok(SubmitOptions {
            name: self.name.clone(),
            hold: self.hold.clone().into(),
            work_dir: self.work_dir.clone(),
            resource: self.resource()?,
        })
    }

    fn config(&self) -> SubmitterConfig {
        let mut config = SubmitterConfig::new();
        if let Some(dir) = &self.script_dir {
            config = config.with_script_dir(dir);
        }
        if let Some(dir) = &self.log_dir {
            config = config.with_log_dir(dir);
        }
        config
    }
}

/// Execute the submit command.
pub async fn execute(args: SubmitArgs) -> Result<()> {
    let kind = scheduler_kind(args.scheduler.as_deref())?;
    let body = args.body()?;
    let options = args.options()?;

    println!(
        "{} Submitting {} via {}",
        style("→").cyan().bold(),
        style(args.name.as_deref().unwrap_or("job")).green(),
        style(kind).magenta()
    );

    let submitter = create_submitter(kind, args.config()).await?;
    match submitter.submit(body, options).await? {
        Some(info) => print_submitted(args.name.as_deref().unwrap_or("job"), &info),
        None => println!("{} Empty job body, nothing submitted", style("!").yellow().bold()),
    }

    Ok(())
}
