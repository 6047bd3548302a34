//! Wait command implementation.
//!
//! Poll SLURM accounting until the given jobs finish.

use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDateTime;

use drm_sched::{Waiter, parse_submit_time};

use super::common::wait_with_spinner;

/// Parse `--since` for clap.
pub fn parse_since(input: &str) -> Result<NaiveDateTime, String> {
    parse_submit_time(input).map_err(|e| e.to_string())
}

/// Build the waiter for ids submitted by another process.
///
/// Without `since` every accounting row is considered and the newest row of
/// each id wins.
pub fn waiter(
    job_ids: Vec<String>,
    interval: u64,
    timeout: Option<u64>,
    since: Option<NaiveDateTime>,
) -> Waiter {
    let mut waiter = Waiter::new(job_ids).with_interval(Duration::from_secs(interval));
    if let Some(secs) = timeout {
        waiter = waiter.with_timeout(Duration::from_secs(secs));
    }
    match since {
        Some(since) => waiter.with_since(since),
        None => waiter.without_cutoff(),
    }
}

/// Execute the wait command.
pub async fn execute(
    job_ids: Vec<String>,
    interval: u64,
    timeout: Option<u64>,
    since: Option<NaiveDateTime>,
) -> Result<()> {
    wait_with_spinner(waiter(job_ids, interval, timeout, since)).await
}
