//! Job arrays: one submission fanning out into indexed sub-tasks.

use serde::{Deserialize, Serialize};

/// An ordered list of commands submitted as a single array job.
///
/// Task `k` runs `jobs[k]`; indices are 0-based and the scheduler is asked
/// for the range `0..=len-1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobArray {
    jobs: Vec<String>,
}

impl JobArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_jobs<I, S>(jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            jobs: jobs.into_iter().map(Into::into).collect(),
        }
    }

    /// Append a command as the next task.
    pub fn add_job(&mut self, job: impl Into<String>) {
        self.jobs.push(job.into());
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.jobs.iter().map(String::as_str)
    }

    /// Highest task index, or `None` for an empty array.
    pub fn bound(&self) -> Option<u32> {
        self.jobs
            .len()
            .checked_sub(1)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
    }

    /// One `if` branch per task, keyed on the scheduler's index variable.
    pub fn render_branches(&self, index_var: &str) -> String {
        self.jobs
            .iter()
            .enumerate()
            .map(|(i, job)| format!("if [ \"${{{index_var}}}\" == {i} ]; then\n  {job}\nfi"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<'a> IntoIterator for &'a JobArray {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_job_and_bound() {
        let mut array = JobArray::new();
        assert!(array.is_empty());
        assert_eq!(array.bound(), None);

        array.add_job("./job1");
        assert_eq!(array.bound(), Some(0));

        array.add_job("./job2");
        assert_eq!(array.len(), 2);
        assert_eq!(array.bound(), Some(1));
        assert_eq!(array.iter().collect::<Vec<_>>(), vec!["./job1", "./job2"]);
    }

    #[test]
    fn test_render_branches() {
        let array = JobArray::from_jobs(["./a", "./b", "./c"]);
        let text = array.render_branches("SLURM_ARRAY_TASK_ID");

        assert_eq!(text.matches("if [").count(), 3);
        assert!(text.starts_with("if [ \"${SLURM_ARRAY_TASK_ID}\" == 0 ]; then\n  ./a\nfi"));
        assert!(text.contains("== 1 ]; then\n  ./b\nfi"));
        assert!(text.ends_with("== 2 ]; then\n  ./c\nfi"));
    }
}
