//! SLURM backend.

use crate::backend::{Backend, SchedulerKind, first_digits, join_ids};
use crate::resource::{ResourceVariant, format_walltime};
use crate::template::{Directive, Field, FieldSet, FieldValue, Formatted, HeaderTemplate};

static SLURM_HEADER: HeaderTemplate = HeaderTemplate::new(
    "#SBATCH",
    &[
        Directive::Flag("--parsable"),
        Directive::Flag("--export=ALL"),
        Directive::Field(Field::ArrayBound, array_range),
        Directive::Field(Field::LogDir, log_files),
        Directive::Field(Field::WorkDir, work_dir),
        Directive::Field(Field::Name, job_name),
        Directive::Field(Field::Hold, dependency),
    ],
);

static SLURM_RESOURCE: HeaderTemplate = HeaderTemplate::new(
    "#SBATCH",
    &[
        Directive::Field(Field::Time, time_limit),
        Directive::Field(Field::Memory, memory),
        Directive::Field(Field::Workers, cores),
        Directive::Field(Field::Constraint, constraint),
    ],
);

static SLURM_MPI_RESOURCE: HeaderTemplate = HeaderTemplate::new(
    "#SBATCH",
    &[
        Directive::Field(Field::Time, time_limit),
        Directive::Field(Field::Memory, memory),
        Directive::Field(Field::Workers, ntasks),
        Directive::Field(Field::Ppn, per_node),
        Directive::Field(Field::Constraint, constraint),
    ],
);

/// SLURM backend: `sbatch --parsable`, `#SBATCH` directives.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlurmBackend;

impl Backend for SlurmBackend {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Slurm
    }

    fn submit_program(&self) -> &str {
        "sbatch"
    }

    fn header(&self) -> &HeaderTemplate {
        &SLURM_HEADER
    }

    fn resource_template(&self, variant: ResourceVariant) -> &HeaderTemplate {
        match variant {
            ResourceVariant::Standard => &SLURM_RESOURCE,
            ResourceVariant::Mpi => &SLURM_MPI_RESOURCE,
        }
    }

    fn array_index_var(&self) -> Option<&str> {
        Some("SLURM_ARRAY_TASK_ID")
    }

    fn parse_job_id(&self, stdout: &str) -> Option<String> {
        first_digits(stdout)
    }
}

fn array_range(value: &FieldValue, _: &FieldSet) -> Formatted {
    value.as_count().map(|n| format!("--array=0-{n}")).into()
}

/// `<log_dir>/<script_name>.o%j`, or `.o%A_%a` for arrays.
fn log_files(value: &FieldValue, fields: &FieldSet) -> Formatted {
    let Some(dir) = value.as_path() else {
        return Formatted::Skip;
    };
    let base = dir.join(fields.text(Field::ScriptName).unwrap_or("job"));
    let suffix = if fields.contains(Field::ArrayBound) {
        "%A_%a"
    } else {
        "%j"
    };
    Formatted::Many(vec![
        format!("-o {}.o{suffix}", base.display()),
        format!("-e {}.e{suffix}", base.display()),
    ])
}

fn work_dir(value: &FieldValue, _: &FieldSet) -> Formatted {
    value
        .as_path()
        .map(|dir| format!("-D {}", dir.display()))
        .into()
}

fn job_name(value: &FieldValue, _: &FieldSet) -> Formatted {
    value.as_text().map(|name| format!("-J {name}")).into()
}

fn dependency(value: &FieldValue, _: &FieldSet) -> Formatted {
    join_ids(value, ":")
        .map(|ids| format!("-d afterok:{ids}"))
        .into()
}

fn time_limit(value: &FieldValue, _: &FieldSet) -> Formatted {
    value
        .as_duration()
        .map(|time| format!("-t {}", format_walltime(time)))
        .into()
}

/// Memory in whole megabytes (1 GB = 1000 MB), rounded up.
pub(crate) fn memory_mb(gb: f64) -> u64 {
    (gb * 1000.0).ceil().max(0.0) as u64
}

fn memory(value: &FieldValue, _: &FieldSet) -> Formatted {
    value
        .as_float()
        .map(|gb| format!("--mem={}", memory_mb(gb)))
        .into()
}

fn cores(value: &FieldValue, _: &FieldSet) -> Formatted {
    value.as_count().map(|n| format!("-c {n}")).into()
}

fn ntasks(value: &FieldValue, fields: &FieldSet) -> Formatted {
    value
        .as_count()
        .map(|workers| {
            let ppn = fields.count(Field::Ppn).unwrap_or(1).max(1);
            format!("--ntasks {}", (workers / ppn).max(1))
        })
        .into()
}

fn per_node(value: &FieldValue, _: &FieldSet) -> Formatted {
    match value.as_count() {
        Some(ppn) => Formatted::Many(vec![
            format!("--cpus-per-task={ppn}"),
            "--ntasks-per-node=1".to_string(),
        ]),
        None => Formatted::Skip,
    }
}

fn constraint(value: &FieldValue, _: &FieldSet) -> Formatted {
    value
        .as_text()
        .map(|features| format!("--constraint {features}"))
        .into()
}
