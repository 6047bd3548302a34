//! Shared helpers for CLI commands.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use drm_sched::{
    BackendConfig, JobArray, JobInfo, JobRegistry, SchedulerKind, Submitter, SubmitterConfig,
    Waiter, backend_for,
};

/// Parse a scheduler name, or detect one when none is given.
pub fn scheduler_kind(name: Option<&str>) -> Result<SchedulerKind> {
    match name {
        Some(name) => name
            .parse::<SchedulerKind>()
            .with_context(|| "Available schedulers: pbs, sge, slurm, local"),
        None => Ok(SchedulerKind::detect()),
    }
}

/// Build a submitter with a fresh registry.
pub async fn create_submitter(kind: SchedulerKind, config: SubmitterConfig) -> Result<Submitter> {
    let backend = backend_for(kind, &BackendConfig::from_env());
    Submitter::new(backend, Arc::new(JobRegistry::new()), config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to prepare {kind} submission: {e}"))
}

/// Read an array file: one command per non-empty line.
pub fn load_array(path: &Path) -> Result<JobArray> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read array file: {}", path.display()))?;
    Ok(JobArray::from_jobs(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#')),
    ))
}

/// Print one submitted job.
pub fn print_submitted(label: &str, info: &JobInfo) {
    match &info.id {
        Some(id) => println!(
            "{} {} submitted as {}",
            style("✓").green().bold(),
            style(label).bold(),
            style(id).cyan()
        ),
        None => println!(
            "{} {} written to {} (no scheduler accepted it)",
            style("!").yellow().bold(),
            style(label).bold(),
            style(info.script.display()).dim()
        ),
    }
}

/// Run a waiter behind a spinner, then print the outcome.
pub async fn wait_with_spinner(mut waiter: Waiter) -> Result<()> {
    println!(
        "{} Waiting for {} job(s) (interval: {}s{})",
        style("→").cyan().bold(),
        waiter.job_ids().len(),
        waiter.interval().as_secs(),
        waiter
            .timeout()
            .map(|t| format!(", timeout: {}s", t.as_secs()))
            .unwrap_or_default()
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .context("Invalid spinner template")?,
    );
    spinner.set_message("Polling sacct...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = waiter.wait().await;
    spinner.finish_and_clear();
    result.map_err(|e| anyhow::anyhow!("Failed to wait for jobs: {e}"))?;

    let succeeded = waiter.successful_jobs();
    let failed = waiter.unsuccessful_jobs();
    let pending = waiter.pending_jobs();

    if !succeeded.is_empty() {
        println!(
            "{} Completed: {}",
            style("✓").green().bold(),
            succeeded.join(", ")
        );
    }
    if !failed.is_empty() {
        println!("{} Failed: {}", style("✗").red().bold(), failed.join(", "));
    }
    if !pending.is_empty() {
        anyhow::bail!(
            "Timed out with {} job(s) unfinished: {}",
            pending.len(),
            pending.join(", ")
        );
    }
    if !failed.is_empty() {
        anyhow::bail!("{} job(s) failed", failed.len());
    }
    Ok(())
}
