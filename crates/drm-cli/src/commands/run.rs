//! Run command implementation.
//!
//! Submits a YAML pipeline in order, optionally waiting for the jobs.

use std::path::Path;

use anyhow::Result;
use console::style;

use drm_sched::{Pipeline, SchedulerKind};

use super::common::{create_submitter, print_submitted, scheduler_kind, wait_with_spinner};

/// Execute the run command.
pub async fn execute(path: &Path, scheduler: Option<&str>, wait: bool) -> Result<()> {
    let pipeline = Pipeline::load(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {e}", path.display()))?;

    let kind = match scheduler {
        Some(name) => scheduler_kind(Some(name))?,
        None => match pipeline.scheduler_kind()? {
            Some(kind) => kind,
            None => scheduler_kind(None)?,
        },
    };

    println!(
        "{} Submitting {} job(s) from {} via {}",
        style("→").cyan().bold(),
        pipeline.jobs.len(),
        style(path.display()).green(),
        style(kind).magenta()
    );

    let base = path.parent().unwrap_or(Path::new("."));
    tracing::debug!("Resolving pipeline directories against {}", base.display());
    let submitter = create_submitter(kind, pipeline.submitter_config(base)).await?;
    let submitted = pipeline.submit(&submitter).await?;

    for info in &submitted {
        let label = info
            .script
            .file_name()
            .map_or_else(|| "job".to_string(), |n| n.to_string_lossy().into_owned());
        print_submitted(&label, info);
    }

    if !wait {
        return Ok(());
    }
    if kind != SchedulerKind::Slurm {
        anyhow::bail!("--wait needs SLURM accounting; {kind} jobs cannot be polled");
    }

    let ids: Vec<String> = submitted.into_iter().filter_map(|info| info.id).collect();
    let settings = pipeline.wait.clone().unwrap_or_default();
    wait_with_spinner(settings.waiter(ids)).await
}
