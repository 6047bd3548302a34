//! Script rendering and submission.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;

use crate::array::JobArray;
use crate::backend::{Backend, SchedulerKind};
use crate::error::DrmResult;
use crate::registry::{JobRegistry, Names};
use crate::resource::Resource;
use crate::runner::{CommandRunner, SystemRunner};
use crate::template::{Field, FieldSet};
use crate::waiter;

/// Where scripts and logs go, and how scripts are interpreted.
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// Directory for generated scripts (default: current directory).
    pub script_dir: Option<PathBuf>,
    /// Directory for scheduler output files (default: current directory).
    pub log_dir: Option<PathBuf>,
    /// Interpreter for the shebang line.
    pub shell: String,
    /// Hex characters in the per-submitter script token.
    pub uid_length: usize,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            script_dir: None,
            log_dir: None,
            shell: "/bin/bash".to_string(),
            uid_length: 8,
        }
    }
}

impl SubmitterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_dir = Some(dir.into());
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_uid_length(mut self, len: usize) -> Self {
        self.uid_length = len.clamp(1, 32);
        self
    }
}

/// What a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum JobBody {
    /// Script text, written verbatim below the directives.
    Script(String),
    /// One branch per command, selected by the array index.
    Array(JobArray),
}

impl JobBody {
    /// An empty body submits nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            JobBody::Script(text) => text.is_empty(),
            JobBody::Array(array) => array.is_empty(),
        }
    }
}

impl From<&str> for JobBody {
    fn from(text: &str) -> Self {
        JobBody::Script(text.to_string())
    }
}

impl From<String> for JobBody {
    fn from(text: String) -> Self {
        JobBody::Script(text)
    }
}

impl From<JobArray> for JobBody {
    fn from(array: JobArray) -> Self {
        JobBody::Array(array)
    }
}

impl From<&JobArray> for JobBody {
    fn from(array: &JobArray) -> Self {
        JobBody::Array(array.clone())
    }
}

/// Per-job options.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub name: Option<String>,
    pub hold: Names,
    pub work_dir: Option<PathBuf>,
    pub resource: Option<Resource>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_hold(mut self, hold: impl Into<Names>) -> Self {
        self.hold = hold.into();
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<Resource>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// Result of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    /// Scheduler-assigned id; absent when the submit program is missing.
    pub id: Option<String>,
    /// The generated script.
    pub script: PathBuf,
}

/// Renders job scripts for one backend and submits them.
#[derive(Debug)]
pub struct Submitter {
    backend: Arc<dyn Backend>,
    registry: Arc<JobRegistry>,
    runner: Arc<dyn CommandRunner>,
    script_dir: PathBuf,
    log_dir: PathBuf,
    shell: String,
    uid: String,
}

impl Submitter {
    /// Create a submitter, creating the script and log directories.
    pub async fn new(
        backend: Arc<dyn Backend>,
        registry: Arc<JobRegistry>,
        config: SubmitterConfig,
    ) -> DrmResult<Self> {
        // Accounting rows are compared against this; it must predate any job.
        waiter::process_start_time();

        let cwd = std::env::current_dir()?;
        let script_dir = std::path::absolute(config.script_dir.unwrap_or_else(|| cwd.clone()))?;
        let log_dir = std::path::absolute(config.log_dir.unwrap_or(cwd))?;
        fs::create_dir_all(&script_dir).await?;
        fs::create_dir_all(&log_dir).await?;

        let runner: Arc<dyn CommandRunner> = match backend.kind() {
            SchedulerKind::Local => Arc::new(SystemRunner::new().without_timeout()),
            _ => Arc::new(SystemRunner::new()),
        };

        let uid_length = config.uid_length.clamp(1, 32);
        let uid = uuid::Uuid::new_v4().simple().to_string()[..uid_length].to_string();

        tracing::debug!(
            "{} submitter {} writing scripts to {}",
            backend.kind(),
            uid,
            script_dir.display()
        );

        Ok(Self {
            backend,
            registry,
            runner,
            script_dir,
            log_dir,
            shell: config.shell,
            uid,
        })
    }

    /// Replace the process runner.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// `<script_dir>/<name or "job">-<uid>`.
    pub fn script_path(&self, name: Option<&str>) -> PathBuf {
        self.script_dir
            .join(format!("{}-{}", name.unwrap_or("job"), self.uid))
    }

    /// Render the full script: shebang, directives, resources, body.
    pub fn render(
        &self,
        body: &JobBody,
        options: &SubmitOptions,
        work_dir: &Path,
        hold: Vec<String>,
    ) -> DrmResult<String> {
        let mut fields = FieldSet::new();
        fields
            .set(Field::Shell, self.shell.as_str())
            .set(Field::ScriptName, options.name.as_deref().unwrap_or("job"))
            .set(Field::LogDir, self.log_dir.clone())
            .set(Field::WorkDir, work_dir.to_path_buf())
            .set_opt(Field::Name, options.name.as_deref())
            .set_opt(Field::Hold, (!hold.is_empty()).then_some(hold));

        let text = match body {
            JobBody::Script(text) => text.clone(),
            JobBody::Array(array) => {
                fields.set_opt(Field::ArrayBound, array.bound());
                self.backend.render_array(array)?
            }
        };
        self.backend.extend_fields(&mut fields);

        let header = self.backend.header().render(&fields);
        let resource = options
            .resource
            .as_ref()
            .map(|r| r.render(self.backend.as_ref()))
            .unwrap_or_default();

        let mut script = format!("#!{}\n", self.shell);
        if !header.is_empty() {
            script.push_str(&header);
            script.push('\n');
        }
        script.push('\n');
        if !resource.is_empty() {
            script.push_str(&resource);
            script.push_str("\n\n");
        }
        script.push_str(&text);
        script.push('\n');
        Ok(script)
    }

    /// Submit a job.
    ///
    /// An empty body returns `Ok(None)` without touching the filesystem or
    /// running anything. Hold names that do not resolve are dropped.
    ///
    /// The duplicate-name check runs after the submit program, so a
    /// duplicate name still reaches the scheduler before the error is
    /// returned. Use [`JobRegistry::contains`] to check up front.
    pub async fn submit(
        &self,
        body: impl Into<JobBody>,
        options: SubmitOptions,
    ) -> DrmResult<Option<JobInfo>> {
        let body = body.into();
        if body.is_empty() {
            return Ok(None);
        }

        let work_dir = match &options.work_dir {
            Some(dir) => std::path::absolute(dir)?,
            None => std::env::current_dir()?,
        };
        let hold = self.registry.resolve(&options.hold);
        let script = self.render(&body, &options, &work_dir, hold)?;
        let script_path = self.script_path(options.name.as_deref());

        fs::write(&script_path, &script).await?;
        tracing::debug!("Wrote {}:\n{}", script_path.display(), script);

        let args = [script_path.to_string_lossy().into_owned()];
        let id = match self.runner.run(self.backend.submit_program(), &args).await {
            Ok(stdout) => self.backend.parse_job_id(&stdout),
            Err(e) if e.is_command_not_found() => {
                tracing::warn!("{}; job {} not submitted", e, script_path.display());
                None
            }
            Err(e) => return Err(e),
        };

        self.registry.record(options.name.as_deref(), id.as_deref())?;

        if let Some(id) = &id {
            tracing::info!(
                "Submitted {} as {} job {}",
                options.name.as_deref().unwrap_or("job"),
                self.backend.kind(),
                id
            );
        }

        Ok(Some(JobInfo {
            id,
            script: script_path,
        }))
    }

    /// Ids recorded in this submitter's registry, in submission order.
    pub fn jobs(&self) -> Vec<String> {
        self.registry.jobs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendConfig, backend_for};
    use crate::resource::ResourceSpec;
    use crate::runner::MockRunner;

    async fn submitter(kind: SchedulerKind, dir: &Path) -> (Submitter, Arc<MockRunner>) {
        let runner = Arc::new(MockRunner::new());
        let submitter = Submitter::new(
            backend_for(kind, &BackendConfig::default()),
            Arc::new(JobRegistry::new()),
            SubmitterConfig::new()
                .with_script_dir(dir.join("scripts"))
                .with_log_dir(dir.join("logs")),
        )
        .await
        .unwrap()
        .with_runner(runner.clone());
        (submitter, runner)
    }

    #[tokio::test]
    async fn test_script_layout() {
        let dir = tempfile::tempdir().unwrap();
        let (submitter, _) = submitter(SchedulerKind::Slurm, dir.path()).await;

        let options = SubmitOptions::new()
            .with_name("align")
            .with_resource(ResourceSpec::default());
        let script = submitter
            .render(&"echo hi".into(), &options, Path::new("/work"), vec!["7".into()])
            .unwrap();

        let log = submitter.log_dir().join("align");
        assert_eq!(
            script,
            format!(
                "#!/bin/bash\n\
                 #SBATCH --parsable\n\
                 #SBATCH --export=ALL\n\
                 #SBATCH -o {0}.o%j\n\
                 #SBATCH -e {0}.e%j\n\
                 #SBATCH -D /work\n\
                 #SBATCH -J align\n\
                 #SBATCH -d afterok:7\n\
                 \n\
                 #SBATCH -t 00:59:00\n\
                 #SBATCH --mem=1000\n\
                 #SBATCH -c 1\n\
                 \n\
                 echo hi\n",
                log.display()
            )
        );
    }

    #[tokio::test]
    async fn test_submit_writes_script_and_records_id() {
        let dir = tempfile::tempdir().unwrap();
        let (submitter, runner) = submitter(SchedulerKind::Slurm, dir.path()).await;

        let info = submitter
            .submit("echo hi", SubmitOptions::new().with_name("first"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(info.id.as_deref(), Some("1"));
        assert_eq!(
            info.script,
            submitter
                .script_dir()
                .join(format!("first-{}", submitter.uid()))
        );
        let text = std::fs::read_to_string(&info.script).unwrap();
        assert!(text.starts_with("#!/bin/bash\n#SBATCH"));
        assert!(text.ends_with("\necho hi\n"));

        let calls = runner.calls();
        assert_eq!(calls[0].0, "sbatch");
        assert_eq!(calls[0].1, vec![info.script.to_string_lossy().into_owned()]);
        assert_eq!(submitter.registry().get("first").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_body_is_written_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let (submitter, _) = submitter(SchedulerKind::Pbs, dir.path()).await;

        let body = "echo \"$HOME\" 'a\\b' `date`";
        let info = submitter
            .submit(body, SubmitOptions::new())
            .await
            .unwrap()
            .unwrap();
        let text = std::fs::read_to_string(&info.script).unwrap();
        assert!(text.ends_with(&format!("\n{body}\n")));
    }

    #[tokio::test]
    async fn test_uid_length() {
        let dir = tempfile::tempdir().unwrap();
        let (submitter, _) = submitter(SchedulerKind::Local, dir.path()).await;
        assert_eq!(submitter.uid().len(), 8);
        assert!(submitter.uid().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_sibling_submitters_differ() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = submitter(SchedulerKind::Slurm, dir.path()).await;
        let (b, _) = submitter(SchedulerKind::Slurm, dir.path()).await;
        assert_ne!(a.script_path(None), b.script_path(None));
    }

    #[tokio::test]
    async fn test_missing_submit_program() {
        let dir = tempfile::tempdir().unwrap();
        let (submitter, _) = submitter(SchedulerKind::Pbs, dir.path()).await;
        let submitter = submitter.with_runner(Arc::new(MockRunner::missing()));

        let info = submitter
            .submit("echo hi", SubmitOptions::new().with_name("x"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.id, None);
        assert!(info.script.exists());
        assert!(submitter.registry().is_empty());
    }
}
