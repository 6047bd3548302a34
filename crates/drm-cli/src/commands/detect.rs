//! Detect command implementation.

use console::style;

use drm_sched::{BackendConfig, SchedulerKind, backend_for};

/// Execute the detect command.
pub fn execute() {
    let kind = SchedulerKind::detect();
    let backend = backend_for(kind, &BackendConfig::from_env());

    println!(
        "{} {} (submits with {})",
        style("Scheduler:").cyan().bold(),
        style(kind).green(),
        style(backend.submit_program()).dim()
    );
}
