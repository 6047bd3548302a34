//! PBS / Torque backend.

use std::sync::LazyLock;

use regex::Regex;

use crate::backend::{Backend, SchedulerKind, join_ids};
use crate::resource::{ResourceVariant, format_walltime};
use crate::template::{Directive, Field, FieldSet, FieldValue, Formatted, HeaderTemplate};

static PBS_HEADER: HeaderTemplate = HeaderTemplate::new(
    "#PBS",
    &[
        Directive::Flag("-V"),
        Directive::Field(Field::LogDir, log_dirs),
        Directive::Field(Field::WorkDir, work_dir),
        Directive::Field(Field::ArrayBound, array_range),
        Directive::Field(Field::Name, job_name),
        Directive::Field(Field::Hold, depend),
    ],
);

static PBS_RESOURCE: HeaderTemplate = HeaderTemplate::new(
    "#PBS",
    &[Directive::Joined {
        flag: "-l",
        separator: ",",
        parts: &[
            (Field::Workers, nodes),
            (Field::Memory, vmem),
            (Field::Time, walltime),
        ],
    }],
);

static PBS_MPI_RESOURCE: HeaderTemplate = HeaderTemplate::new(
    "#PBS",
    &[Directive::Joined {
        flag: "-l",
        separator: ",",
        parts: &[
            (Field::Workers, mpi_nodes),
            (Field::Memory, vmem),
            (Field::Time, walltime),
        ],
    }],
);

/// PBS backend: `qsub`, `#PBS` directives, raw stdout as the job id.
#[derive(Debug, Clone, Copy, Default)]
pub struct PbsBackend;

impl Backend for PbsBackend {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Pbs
    }

    fn submit_program(&self) -> &str {
        "qsub"
    }

    fn header(&self) -> &HeaderTemplate {
        &PBS_HEADER
    }

    fn resource_template(&self, variant: ResourceVariant) -> &HeaderTemplate {
        match variant {
            ResourceVariant::Standard => &PBS_RESOURCE,
            ResourceVariant::Mpi => &PBS_MPI_RESOURCE,
        }
    }

    fn array_index_var(&self) -> Option<&str> {
        Some("PBS_ARRAYID")
    }

    /// qsub prints the full id (`12345.server`), which is used verbatim.
    fn parse_job_id(&self, stdout: &str) -> Option<String> {
        let trimmed = stdout.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// PBS job names must start with a letter and contain no whitespace.
pub(crate) fn sanitize_name(name: &str) -> String {
    let mut valid = name.to_string();
    if !valid.starts_with(|c: char| c.is_ascii_alphabetic()) {
        valid = format!("job-{valid}");
    }
    WHITESPACE.replace_all(&valid, "_").into_owned()
}

fn log_dirs(value: &FieldValue, _: &FieldSet) -> Formatted {
    match value.as_path() {
        Some(dir) => Formatted::Many(vec![
            format!("-o {}", dir.display()),
            format!("-e {}", dir.display()),
        ]),
        None => Formatted::Skip,
    }
}

fn work_dir(value: &FieldValue, _: &FieldSet) -> Formatted {
    value
        .as_path()
        .map(|dir| format!("-d {}", dir.display()))
        .into()
}

fn array_range(value: &FieldValue, _: &FieldSet) -> Formatted {
    value.as_count().map(|n| format!("-t 0-{n}")).into()
}

fn job_name(value: &FieldValue, _: &FieldSet) -> Formatted {
    value
        .as_text()
        .map(|name| format!("-N {}", sanitize_name(name)))
        .into()
}

fn depend(value: &FieldValue, _: &FieldSet) -> Formatted {
    join_ids(value, ":")
        .map(|ids| format!("-W depend=afterok:{ids}"))
        .into()
}

fn node_spec(workers: u32, ppn: u32, fields: &FieldSet) -> String {
    let ppn = ppn.max(1);
    let nodes = workers.div_ceil(ppn);
    match fields.text(Field::Constraint) {
        Some(constraint) => format!("nodes={nodes}:ppn={ppn}:{constraint}"),
        None => format!("nodes={nodes}:ppn={ppn}"),
    }
}

/// Plain requests pack all workers on one node.
fn nodes(value: &FieldValue, fields: &FieldSet) -> Formatted {
    value
        .as_count()
        .map(|workers| node_spec(workers, workers, fields))
        .into()
}

fn mpi_nodes(value: &FieldValue, fields: &FieldSet) -> Formatted {
    value
        .as_count()
        .map(|workers| node_spec(workers, fields.count(Field::Ppn).unwrap_or(1), fields))
        .into()
}

fn vmem(value: &FieldValue, _: &FieldSet) -> Formatted {
    value
        .as_float()
        .map(|gb| format!("vmem={}gb", gb.ceil() as u64))
        .into()
}

fn walltime(value: &FieldValue, _: &FieldSet) -> Formatted {
    value
        .as_duration()
        .map(|time| format!("walltime={}", format_walltime(time)))
        .into()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::resource::{MpiResourceSpec, Resource, ResourceSpec};

    #[test]
    fn test_resource_defaults() {
        let text = Resource::from(ResourceSpec::default()).render(&PbsBackend);
        assert_eq!(text, "#PBS -l nodes=1:ppn=1,vmem=1gb,walltime=00:59:00");
    }

    #[test]
    fn test_resource_custom() {
        let spec = ResourceSpec::new()
            .with_time(Duration::from_secs(2 * 86400 + 6 * 60))
            .with_workers(4)
            .with_memory_gb(2.345);
        assert_eq!(
            Resource::from(spec).render(&PbsBackend),
            "#PBS -l nodes=1:ppn=4,vmem=3gb,walltime=48:06:00"
        );
    }

    #[test]
    fn test_resource_constraint() {
        let spec = ResourceSpec::new().with_constraint("intel");
        assert_eq!(
            Resource::from(spec).render(&PbsBackend),
            "#PBS -l nodes=1:ppn=1:intel,vmem=1gb,walltime=00:59:00"
        );
    }

    #[test]
    fn test_resource_without_time() {
        let text = Resource::from(ResourceSpec::new().without_time()).render(&PbsBackend);
        assert!(!text.contains("walltime"));
        assert_eq!(text, "#PBS -l nodes=1:ppn=1,vmem=1gb");
    }

    #[test]
    fn test_mpi_resource() {
        let spec = MpiResourceSpec::new().with_base(
            ResourceSpec::new()
                .with_time(Duration::from_secs(2 * 86400 + 6 * 60))
                .with_workers(4)
                .with_memory_gb(2.345),
        );
        assert_eq!(
            Resource::from(spec).render(&PbsBackend),
            "#PBS -l nodes=4:ppn=1,vmem=3gb,walltime=48:06:00"
        );

        let spec = MpiResourceSpec::new()
            .with_base(ResourceSpec::new().with_workers(8))
            .with_ppn(3);
        assert!(
            Resource::from(spec)
                .render(&PbsBackend)
                .starts_with("#PBS -l nodes=3:ppn=3,")
        );
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("test"), "test");
        assert_eq!(sanitize_name("1st"), "job-1st");
        assert_eq!(sanitize_name("my  job\tname"), "my_job_name");
    }

    #[test]
    fn test_header() {
        let mut fields = FieldSet::new();
        fields
            .set(Field::LogDir, PathBuf::from("/logs"))
            .set(Field::WorkDir, PathBuf::from("/work"))
            .set(Field::Name, "align reads")
            .set(Field::Hold, vec!["1".to_string(), "2".to_string()]);

        assert_eq!(
            PBS_HEADER.lines(&fields),
            vec![
                "#PBS -V",
                "#PBS -o /logs",
                "#PBS -e /logs",
                "#PBS -d /work",
                "#PBS -N align_reads",
                "#PBS -W depend=afterok:1:2",
            ]
        );
    }

    #[test]
    fn test_parse_job_id() {
        assert_eq!(
            PbsBackend.parse_job_id("12345.pbs-server\n"),
            Some("12345.pbs-server".to_string())
        );
        assert_eq!(PbsBackend.parse_job_id("  \n"), None);
    }
}
