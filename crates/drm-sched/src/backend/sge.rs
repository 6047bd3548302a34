//! Sun Grid Engine backend.

use crate::backend::{Backend, SchedulerKind, first_digits, join_ids};
use crate::resource::{ResourceVariant, format_walltime};
use crate::template::{Directive, Field, FieldSet, FieldValue, Formatted, HeaderTemplate};

static SGE_HEADER: HeaderTemplate = HeaderTemplate::new(
    "#$",
    &[
        Directive::Field(Field::WorkDir, work_dir),
        Directive::Flag("-V"),
        Directive::Field(Field::Shell, shell),
        Directive::Field(Field::LogDir, log_dirs),
        Directive::Field(Field::Name, job_name),
        Directive::Field(Field::Hold, hold_jid),
    ],
);

// SGE has no separate MPI layout; both variants request slots through the
// parallel environment.
static SGE_RESOURCE: HeaderTemplate = HeaderTemplate::new(
    "#$",
    &[
        Directive::Joined {
            flag: "-l",
            separator: ",",
            parts: &[
                (Field::Time, h_rt),
                (Field::Memory, h_vmem),
                (Field::Memory, mem_free),
            ],
        },
        Directive::Field(Field::Workers, parallel),
        Directive::Field(Field::Constraint, constraint),
    ],
);

/// SGE backend: `qsub`, `#$` directives, first number in stdout as job id.
#[derive(Debug, Clone)]
pub struct SgeBackend {
    pe_name: String,
}

impl SgeBackend {
    pub fn new(pe_name: impl Into<String>) -> Self {
        Self {
            pe_name: pe_name.into(),
        }
    }

    pub fn pe_name(&self) -> &str {
        &self.pe_name
    }
}

impl Backend for SgeBackend {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Sge
    }

    fn submit_program(&self) -> &str {
        "qsub"
    }

    fn header(&self) -> &HeaderTemplate {
        &SGE_HEADER
    }

    fn resource_template(&self, _variant: ResourceVariant) -> &HeaderTemplate {
        &SGE_RESOURCE
    }

    fn array_index_var(&self) -> Option<&str> {
        None
    }

    fn parse_job_id(&self, stdout: &str) -> Option<String> {
        first_digits(stdout)
    }

    fn extend_fields(&self, fields: &mut FieldSet) {
        fields.set(Field::ParallelEnv, self.pe_name.as_str());
    }
}

fn work_dir(value: &FieldValue, _: &FieldSet) -> Formatted {
    value
        .as_path()
        .map(|dir| format!("-wd {}", dir.display()))
        .into()
}

fn shell(value: &FieldValue, _: &FieldSet) -> Formatted {
    value.as_text().map(|sh| format!("-S {sh}")).into()
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

fn job_name(value: &FieldValue, _: &FieldSet) -> Formatted {
    value.as_text().map(|name| format!("-N {name}")).into()
}

fn hold_jid(value: &FieldValue, _: &FieldSet) -> Formatted {
    join_ids(value, ",")
        .map(|ids| format!("-hold_jid {ids}"))
        .into()
}

fn h_rt(value: &FieldValue, _: &FieldSet) -> Formatted {
    value
        .as_duration()
        .map(|time| format!("h_rt={}", format_walltime(time)))
        .into()
}

/// Memory is requested per slot, never below 0.01G.
fn per_slot_memory(total_gb: f64, fields: &FieldSet) -> String {
    let workers = fields.count(Field::Workers).unwrap_or(1).max(1);
    let per_slot = total_gb / f64::from(workers);
    format!("{:.2}G", per_slot.max(0.01))
}

fn h_vmem(value: &FieldValue, fields: &FieldSet) -> Formatted {
    value
        .as_float()
        .map(|gb| format!("h_vmem={}", per_slot_memory(gb, fields)))
        .into()
}

fn mem_free(value: &FieldValue, fields: &FieldSet) -> Formatted {
    value
        .as_float()
        .map(|gb| format!("mem_free={}", per_slot_memory(gb, fields)))
        .into()
}

fn parallel(value: &FieldValue, fields: &FieldSet) -> Formatted {
    match (value.as_count(), fields.text(Field::ParallelEnv)) {
        (Some(workers), Some(pe)) if workers > 1 => format!("-pe {pe} {workers}").into(),
        _ => Formatted::Skip,
    }
}

fn constraint(value: &FieldValue, _: &FieldSet) -> Formatted {
    value.as_text().map(|features| format!("-l {features}")).into()
}
