//! Polling waiter over SLURM accounting (`sacct`).
//!
//! The waiter queries `sacct` for the requested ids and sorts jobs into
//! successful and unsuccessful sets; anything else is still pending. Rows
//! submitted before a cutoff are ignored: SLURM recycles ids, so the
//! accounting log can hold an older, unrelated job under the same id. The
//! cutoff is the process start time unless [`Waiter::with_since`] moves it,
//! which is needed for jobs another process submitted.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{DrmError, DrmResult};
use crate::registry::Names;
use crate::runner::{CommandRunner, SystemRunner};

/// `sacct` columns, in order.
pub const ACCOUNTING_FIELDS: [&str; 4] = ["jobidraw", "state", "exitcode", "submit"];

const SUBMIT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const SUCCESS_STATE: &str = "COMPLETED";
const FAILURE_STATES: [&str; 3] = ["FAIL", "CANCELLED", "TIMEOUT"];

/// Consecutive unparseable query results tolerated by [`Waiter::wait`].
pub const MAX_PARSE_FAILURES: u32 = 3;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

static PROCESS_START: LazyLock<NaiveDateTime> =
    LazyLock::new(|| Local::now().naive_local().trunc_subsecs(0));

/// Local time this process first touched the waiter or a submitter,
/// truncated to whole seconds.
pub fn process_start_time() -> NaiveDateTime {
    *PROCESS_START
}

/// Parse a local timestamp as `sacct` prints it (`2024-05-01T12:30:00`).
/// A space instead of `T`, or a bare date meaning midnight, is accepted too.
pub fn parse_submit_time(input: &str) -> DrmResult<NaiveDateTime> {
    let input = input.trim();
    NaiveDateTime::parse_from_str(input, SUBMIT_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN))
        })
        .map_err(|_| DrmError::InvalidTimestamp(input.to_string()))
}

/// Outcome of a job according to its accounting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Pending,
}

impl JobOutcome {
    pub fn from_state(state: &str) -> Self {
        if state.contains(SUCCESS_STATE) {
            JobOutcome::Succeeded
        } else if FAILURE_STATES.iter().any(|marker| state.contains(marker)) {
            JobOutcome::Failed
        } else {
            JobOutcome::Pending
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobOutcome::Pending)
    }
}

/// One `sacct` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingRecord {
    pub job_id: String,
    pub state: String,
    pub exit_code: String,
    pub submit: NaiveDateTime,
}

impl AccountingRecord {
    pub fn outcome(&self) -> JobOutcome {
        JobOutcome::from_state(&self.state)
    }

    /// Steps such as `1234.batch` or `1234.extern` belong to another row.
    fn is_step(&self) -> bool {
        self.job_id.contains('.')
    }
}

fn parse_row(line: &str) -> Option<AccountingRecord> {
    let parts: Vec<&str> = line.split('|').map(str::trim).collect();
    let [job_id, state, exit_code, submit, ..] = parts.as_slice() else {
        return None;
    };
    if job_id.is_empty() {
        return None;
    }
    let submit = NaiveDateTime::parse_from_str(submit, SUBMIT_FORMAT).ok()?;
    Some(AccountingRecord {
        job_id: job_id.to_string(),
        state: state.to_string(),
        exit_code: exit_code.to_string(),
        submit,
    })
}

/// Parse `sacct -nDP` output, dropping job steps and rows submitted before
/// `since`.
///
/// Malformed rows are skipped. Output that has rows but none parse is an
/// [`DrmError::AccountingParse`].
pub fn parse_accounting(stdout: &str, since: NaiveDateTime) -> DrmResult<Vec<AccountingRecord>> {
    let mut records = Vec::new();
    let mut malformed = Vec::new();

    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        match parse_row(line) {
            Some(record) => records.push(record),
            None => malformed.push(line),
        }
    }

    if records.is_empty() && !malformed.is_empty() {
        return Err(DrmError::AccountingParse(format!(
            "no parseable rows in sacct output (first: {:?})",
            malformed[0]
        )));
    }
    for line in &malformed {
        tracing::warn!("Skipping malformed sacct row: {:?}", line);
    }

    records.retain(|r| !r.is_step() && r.submit >= since);
    Ok(records)
}

/// Collapse repeated ids, keeping the last row of each.
fn dedupe(records: Vec<AccountingRecord>, since: NaiveDateTime) -> Vec<AccountingRecord> {
    let mut index: FxHashMap<String, usize> = FxHashMap::default();
    let mut duplicated = BTreeSet::new();
    let mut out: Vec<AccountingRecord> = Vec::with_capacity(records.len());

    for record in records {
        match index.get(&record.job_id) {
            Some(&i) => {
                duplicated.insert(record.job_id.clone());
                out[i] = record;
            }
            None => {
                index.insert(record.job_id.clone(), out.len());
                out.push(record);
            }
        }
    }

    for id in duplicated {
        tracing::error!(
            "Job {} has several accounting rows submitted after {}; using the last",
            id,
            since
        );
    }
    out
}

fn default_runner() -> Arc<dyn CommandRunner> {
    Arc::new(SystemRunner::new().with_timeout(QUERY_TIMEOUT))
}

fn default_program() -> String {
    "sacct".to_string()
}

/// Polls `sacct` until every requested job is terminal or a timeout passes.
#[derive(Debug, Serialize, Deserialize)]
pub struct Waiter {
    job_ids: Vec<String>,
    interval: Duration,
    timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    since: Option<NaiveDateTime>,
    #[serde(default = "default_program")]
    program: String,
    #[serde(skip)]
    records: Vec<AccountingRecord>,
    #[serde(skip, default = "default_runner")]
    runner: Arc<dyn CommandRunner>,
}

impl Waiter {
    /// Wait on `job_ids`, polling every minute with no timeout.
    ///
    /// Repeated ids are collapsed, keeping the first occurrence.
    pub fn new(job_ids: impl Into<Names>) -> Self {
        process_start_time();
        let mut seen = BTreeSet::new();
        let job_ids = job_ids
            .into()
            .into_vec()
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Self {
            job_ids,
            interval: DEFAULT_INTERVAL,
            timeout: None,
            since: None,
            program: default_program(),
            records: Vec::new(),
            runner: default_runner(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Accept accounting rows submitted at or after `since` instead of the
    /// process start time.
    pub fn with_since(mut self, since: NaiveDateTime) -> Self {
        self.since = Some(since);
        self
    }

    /// Accept rows regardless of submit time. Recycled ids then resolve to
    /// the newest row, which `sacct` lists last.
    pub fn without_cutoff(self) -> Self {
        self.with_since(NaiveDateTime::MIN)
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn job_ids(&self) -> &[String] {
        &self.job_ids
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Process start time.
    pub fn start_time(&self) -> NaiveDateTime {
        process_start_time()
    }

    /// Rows submitted before this are stale.
    pub fn cutoff(&self) -> NaiveDateTime {
        self.since.unwrap_or_else(process_start_time)
    }

    pub fn records(&self) -> &[AccountingRecord] {
        &self.records
    }

    fn query_args(&self) -> Vec<String> {
        vec![
            "-nDP".to_string(),
            format!("--format={}", ACCOUNTING_FIELDS.join(",")),
            "-j".to_string(),
            self.job_ids.join(","),
        ]
    }

    /// Refresh accounting records for the requested ids.
    ///
    /// With no ids nothing is run and the records are cleared; an
    /// unfiltered `sacct` would list the whole cluster history.
    pub async fn query(&mut self) -> DrmResult<&Self> {
        if self.job_ids.is_empty() {
            self.records.clear();
            return Ok(self);
        }

        let stdout = self.runner.run(&self.program, &self.query_args()).await?;
        let cutoff = self.cutoff();
        let mut records = parse_accounting(&stdout, cutoff)?;
        records.retain(|r| self.job_ids.contains(&r.job_id));
        self.records = dedupe(records, cutoff);
        Ok(self)
    }

    fn ids_with(&self, outcome: JobOutcome) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.outcome() == outcome)
            .map(|r| r.job_id.clone())
            .collect()
    }

    /// Ids whose state is `COMPLETED`.
    pub fn successful_jobs(&self) -> Vec<String> {
        self.ids_with(JobOutcome::Succeeded)
    }

    /// Ids whose state is a failure, cancellation or timeout.
    pub fn unsuccessful_jobs(&self) -> Vec<String> {
        self.ids_with(JobOutcome::Failed)
    }

    /// Requested ids not yet terminal.
    pub fn pending_jobs(&self) -> Vec<String> {
        self.job_ids
            .iter()
            .filter(|id| {
                !self
                    .records
                    .iter()
                    .any(|r| &r.job_id == *id && r.outcome().is_terminal())
            })
            .cloned()
            .collect()
    }

    pub fn is_done(&self) -> bool {
        self.pending_jobs().is_empty()
    }

    /// Poll until every job is terminal or the timeout is used up.
    ///
    /// Running out of time is not an error; inspect the result sets
    /// afterwards. Up to [`MAX_PARSE_FAILURES`] consecutive unparseable
    /// queries are retried.
    pub async fn wait(&mut self) -> DrmResult<&Self> {
        let mut remaining = self.timeout;
        let mut parse_failures = 0;

        loop {
            match self.query().await {
                Ok(_) => parse_failures = 0,
                Err(DrmError::AccountingParse(msg)) if parse_failures + 1 < MAX_PARSE_FAILURES => {
                    parse_failures += 1;
                    tracing::warn!("Unparseable sacct output ({}): {}", parse_failures, msg);
                }
                Err(e) => return Err(e),
            }

            if self.is_done() {
                return Ok(self);
            }

            tokio::time::sleep(self.interval).await;

            if let Some(left) = remaining.as_mut() {
                *left = left.saturating_sub(self.interval);
                if left.is_zero() {
                    tracing::debug!("Timed out waiting on {}", self.job_ids.join(","));
                    return Ok(self);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::runner::MockRunner;

    fn stamp(offset: chrono::Duration) -> String {
        (process_start_time() + offset)
            .format(SUBMIT_FORMAT)
            .to_string()
    }

    fn sample_output() -> String {
        let now = stamp(chrono::Duration::hours(1));
        let stale = stamp(chrono::Duration::days(-400));
        [
            format!("1|COMPLETED|0:0|{now}"),
            format!("2|CANCELLED by 0|0:0|{now}"),
            format!("3|COMPLETED|0:0|{now}"),
            format!("3.batch|COMPLETED|0:0|{now}"),
            format!("4|PENDING|0:0|{now}"),
            format!("5|FAILED|1:0|{now}"),
            format!("6|COMPLETED|0:0|{stale}"),
        ]
        .join("\n")
    }

    fn waiter(ids: Vec<&str>, stdout: String) -> (Waiter, Arc<MockRunner>) {
        let runner = Arc::new(MockRunner::new().with_response("sacct", stdout));
        let waiter = Waiter::new(ids).with_runner(runner.clone());
        (waiter, runner)
    }

    #[tokio::test]
    async fn test_classification() {
        let (mut waiter, runner) = waiter(vec!["1", "2", "3", "4", "5", "6"], sample_output());
        waiter.query().await.unwrap();

        assert_eq!(waiter.successful_jobs(), vec!["1", "3"]);
        assert_eq!(waiter.unsuccessful_jobs(), vec!["2", "5"]);
        assert_eq!(waiter.pending_jobs(), vec!["4", "6"]);
        assert!(!waiter.is_done());

        let (program, args) = &runner.calls()[0];
        assert_eq!(program, "sacct");
        assert_eq!(
            args,
            &vec![
                "-nDP".to_string(),
                "--format=jobidraw,state,exitcode,submit".to_string(),
                "-j".to_string(),
                "1,2,3,4,5,6".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_stale_row_ignored() {
        let (mut waiter, _) = waiter(vec!["6"], sample_output());
        waiter.query().await.unwrap();
        assert!(waiter.records().is_empty());
        assert!(waiter.successful_jobs().is_empty());
        assert!(waiter.unsuccessful_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_empty_ids_skip_query() {
        let (mut waiter, runner) = waiter(vec![], sample_output());
        waiter.query().await.unwrap();
        assert_eq!(runner.call_count(), 0);
        assert!(waiter.records().is_empty());
        assert!(waiter.is_done());
    }

    #[test]
    fn test_duplicates_keep_last_row() {
        let now = stamp(chrono::Duration::hours(1));
        let stdout = format!("7|FAILED|1:0|{now}\n7|COMPLETED|0:0|{now}");
        let records = dedupe(
            parse_accounting(&stdout, process_start_time()).unwrap(),
            process_start_time(),
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome(), JobOutcome::Succeeded);
    }

    #[test]
    fn test_malformed_rows() {
        let now = stamp(chrono::Duration::hours(1));
        let stdout = format!("garbage\n8|RUNNING|0:0|{now}");
        assert_eq!(
            parse_accounting(&stdout, process_start_time()).unwrap().len(),
            1
        );

        assert!(matches!(
            parse_accounting("garbage\nmore|garbage", process_start_time()),
            Err(DrmError::AccountingParse(_))
        ));
        assert!(parse_accounting("\n", process_start_time()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wait_returns_promptly_when_done() {
        let (waiter, _) = waiter(vec!["1", "2"], sample_output());
        let mut waiter = waiter
            .with_interval(Duration::from_secs(5))
            .with_timeout(Duration::from_secs(30));

        let started = Instant::now();
        waiter.wait().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_wait_honours_timeout() {
        let (waiter, runner) = waiter(vec!["4"], sample_output());
        let mut waiter = waiter
            .with_interval(Duration::from_millis(100))
            .with_timeout(Duration::from_millis(250));

        let started = Instant::now();
        waiter.wait().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(waiter.pending_jobs(), vec!["4"]);
        assert_eq!(runner.call_count(), 3);
    }

    #[tokio::test]
    async fn test_wait_gives_up_on_persistent_parse_failure() {
        let (waiter, runner) = waiter(vec!["1"], "garbage".to_string());
        let mut waiter = waiter.with_interval(Duration::from_millis(1));

        assert!(matches!(
            waiter.wait().await,
            Err(DrmError::AccountingParse(_))
        ));
        assert_eq!(runner.call_count(), MAX_PARSE_FAILURES as usize);
    }

    #[test]
    fn test_start_time_survives_serde() {
        let waiter = Waiter::new("12")
            .with_interval(Duration::from_secs(5))
            .with_timeout(Duration::from_secs(60));
        let json = serde_json::to_string(&waiter).unwrap();
        let loaded: Waiter = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded.start_time(), waiter.start_time());
        assert_eq!(loaded.job_ids(), ["12".to_string()]);
        assert_eq!(loaded.timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_start_time_whole_seconds() {
        use chrono::Timelike;
        assert_eq!(process_start_time().nanosecond(), 0);
    }

    #[tokio::test]
    async fn test_since_admits_jobs_from_earlier_process() {
        let earlier = process_start_time() - chrono::Duration::minutes(1);
        let stdout = format!("42|COMPLETED|0:0|{}", earlier.format(SUBMIT_FORMAT));

        let (mut default_cutoff, _) = waiter(vec!["42"], stdout.clone());
        default_cutoff.query().await.unwrap();
        assert_eq!(default_cutoff.pending_jobs(), vec!["42"]);

        let (waiter, _) = waiter(vec!["42"], stdout);
        let mut waiter = waiter
            .with_since(earlier - chrono::Duration::hours(1))
            .with_interval(Duration::from_millis(10))
            .with_timeout(Duration::from_secs(5));
        waiter.wait().await.unwrap();

        assert_eq!(waiter.successful_jobs(), vec!["42"]);
        assert!(waiter.pending_jobs().is_empty());
        assert!(waiter.is_done());
    }

    #[tokio::test]
    async fn test_since_still_drops_older_rows() {
        let since = process_start_time() - chrono::Duration::days(1);
        let stdout = [
            format!("43|FAILED|1:0|{}", stamp(chrono::Duration::days(-30))),
            format!("44|COMPLETED|0:0|{}", stamp(chrono::Duration::hours(-2))),
        ]
        .join("\n");
        let (waiter, _) = waiter(vec!["43", "44"], stdout);
        let mut waiter = waiter.with_since(since);
        waiter.query().await.unwrap();

        assert_eq!(waiter.cutoff(), since);
        assert_eq!(waiter.successful_jobs(), vec!["44"]);
        assert_eq!(waiter.pending_jobs(), vec!["43"]);
    }

    #[tokio::test]
    async fn test_repeated_ids_finish() {
        let now = stamp(chrono::Duration::hours(1));
        let stdout = format!("7|COMPLETED|0:0|{now}\n8|FAILED|1:0|{now}");
        let (waiter, runner) = waiter(vec!["7", "8", "7"], stdout);
        let mut waiter = waiter
            .with_interval(Duration::from_millis(10))
            .with_timeout(Duration::from_secs(5));
        assert_eq!(waiter.job_ids(), ["7".to_string(), "8".to_string()]);

        waiter.wait().await.unwrap();
        assert!(waiter.is_done());
        assert_eq!(runner.call_count(), 1);
        assert_eq!(runner.calls()[0].1[3], "7,8");
    }

    #[tokio::test]
    async fn test_without_cutoff_uses_newest_row() {
        let stdout = [
            format!("45|FAILED|1:0|{}", stamp(chrono::Duration::days(-400))),
            format!("45|COMPLETED|0:0|{}", stamp(chrono::Duration::days(-2))),
        ]
        .join("\n");
        let (waiter, _) = waiter(vec!["45"], stdout);
        let mut waiter = waiter.without_cutoff();
        waiter.query().await.unwrap();

        assert_eq!(waiter.records().len(), 1);
        assert_eq!(waiter.successful_jobs(), vec!["45"]);
        assert!(waiter.is_done());
    }

    #[test]
    fn test_parse_submit_time() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(parse_submit_time("2024-05-01T12:30:00").unwrap(), expected);
        assert_eq!(parse_submit_time("2024-05-01 12:30:00").unwrap(), expected);
        assert_eq!(
            parse_submit_time("2024-05-01").unwrap(),
            expected.date().and_time(NaiveTime::MIN)
        );
        assert!(matches!(
            parse_submit_time("yesterday"),
            Err(DrmError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_since_survives_serde() {
        let since = parse_submit_time("2024-05-01T08:00:00").unwrap();
        let waiter = Waiter::new("12").with_since(since);
        let json = serde_json::to_string(&waiter).unwrap();
        let loaded: Waiter = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.cutoff(), since);

        let json = serde_json::to_string(&Waiter::new("12")).unwrap();
        let plain: Waiter = serde_json::from_str(&json).unwrap();
        assert_eq!(plain.cutoff(), process_start_time());
    }
}
