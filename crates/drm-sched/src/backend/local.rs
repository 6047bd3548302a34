//! Local fallback: run the script with `bash` on this host.
//!
//! There is no queue, so the script runs to completion inside the submit
//! call. Jobs therefore finish in submission order and holds need no
//! directive. The script prints its own PID first, which serves as job id.

use crate::array::JobArray;
use crate::backend::{Backend, SchedulerKind, first_digits};
use crate::error::DrmResult;
use crate::resource::ResourceVariant;
use crate::template::{Directive, Field, FieldSet, FieldValue, Formatted, HeaderTemplate};

const INDEX_VAR: &str = "DRM_ARRAY_TASK_ID";

static LOCAL_HEADER: HeaderTemplate = HeaderTemplate::new(
    "",
    &[
        Directive::Field(Field::WorkDir, change_dir),
        Directive::Flag("echo $$"),
        Directive::Field(Field::LogDir, redirect_output),
    ],
);

// Resources are not enforced locally.
static LOCAL_RESOURCE: HeaderTemplate = HeaderTemplate::new("", &[]);

/// Local backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackend;

impl Backend for LocalBackend {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Local
    }

    fn submit_program(&self) -> &str {
        "bash"
    }

    fn header(&self) -> &HeaderTemplate {
        &LOCAL_HEADER
    }

    fn resource_template(&self, _variant: ResourceVariant) -> &HeaderTemplate {
        &LOCAL_RESOURCE
    }

    fn array_index_var(&self) -> Option<&str> {
        Some(INDEX_VAR)
    }

    fn parse_job_id(&self, stdout: &str) -> Option<String> {
        first_digits(stdout)
    }

    /// Every task runs in sequence.
    fn render_array(&self, array: &JobArray) -> DrmResult<String> {
        let Some(bound) = array.bound() else {
            return Ok(String::new());
        };
        Ok(format!(
            "for {INDEX_VAR} in $(seq 0 {bound}); do\n{}\ndone",
            array.render_branches(INDEX_VAR)
        ))
    }
}

fn change_dir(value: &FieldValue, _: &FieldSet) -> Formatted {
    value
        .as_path()
        .map(|dir| format!("cd \"{}\"", dir.display()))
        .into()
}

fn redirect_output(value: &FieldValue, fields: &FieldSet) -> Formatted {
    value
        .as_path()
        .map(|dir| {
            let base = dir.join(fields.text(Field::ScriptName).unwrap_or("job"));
            format!(
                "exec 1>\"{0}.stdout\" 2>\"{0}.stderr\"",
                base.display()
            )
        })
        .into()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::resource::{Resource, ResourceSpec};

    #[test]
    fn test_header() {
        let mut fields = FieldSet::new();
        fields
            .set(Field::ScriptName, "test")
            .set(Field::LogDir, PathBuf::from("/logs"))
            .set(Field::WorkDir, PathBuf::from("/work"))
            .set(Field::Hold, vec!["1".to_string()]);

        assert_eq!(
            LOCAL_HEADER.lines(&fields),
            vec![
                "cd \"/work\"",
                "echo $$",
                "exec 1>\"/logs/test.stdout\" 2>\"/logs/test.stderr\"",
            ]
        );
    }

    #[test]
    fn test_resources_ignored() {
        assert_eq!(Resource::from(ResourceSpec::default()).render(&LocalBackend), "");
    }

    #[test]
    fn test_array_loops_over_tasks() {
        let array = JobArray::from_jobs(["./a", "./b"]);
        let text = LocalBackend.render_array(&array).unwrap();
        assert!(text.starts_with("for DRM_ARRAY_TASK_ID in $(seq 0 1); do\n"));
        assert!(text.ends_with("fi\ndone"));
        assert_eq!(text.matches("then").count(), 2);
    }
}
