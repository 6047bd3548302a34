//! Directive templating for batch-script headers.
//!
//! A backend declares its header as a static table of [`Directive`]s. Each
//! directive names the [`Field`] it formats and the function that formats it.
//! Rendering walks the table against a [`FieldSet`]; absent fields are
//! suppressed by [`guarded`], the one place null propagation happens, so
//! individual formatters never see a missing value.
//!
//! ```text
//! Directive::Field(Field::Name, slurm_name)   + Name = "align"
//!     → "#SBATCH -J align"
//! Directive::Field(Field::Name, slurm_name)   + Name absent
//!     → (no line)
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use rustc_hash::FxHashMap;

/// Named inputs a directive can format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Interpreter path used in the shebang and `-S`.
    Shell,
    /// User-chosen job name.
    Name,
    /// Base of the script filename (`name` or `job`).
    ScriptName,
    /// Directory receiving scheduler stdout/stderr files.
    LogDir,
    /// Working directory the job starts in.
    WorkDir,
    /// Resolved job ids this job depends on.
    Hold,
    /// Highest index of a job array (`len - 1`).
    ArrayBound,
    /// SGE parallel-environment name.
    ParallelEnv,
    /// Requested memory in gigabytes.
    Memory,
    /// Requested worker count.
    Workers,
    /// Processes per node for MPI requests.
    Ppn,
    /// Wall-clock limit.
    Time,
    /// Hardware or feature constraint.
    Constraint,
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Count(u32),
    Float(f64),
    Duration(Duration),
    Path(PathBuf),
    Ids(Vec<String>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u32> {
        match self {
            FieldValue::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Float(x) => Some(*x),
            FieldValue::Count(n) => Some(f64::from(*n)),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            FieldValue::Duration(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            FieldValue::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_ids(&self) -> Option<&[String]> {
        match self {
            FieldValue::Ids(ids) => Some(ids),
            _ => None,
        }
    }

    /// An empty string, path or id list carries no value to format.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Path(p) => p.as_os_str().is_empty(),
            FieldValue::Ids(ids) => ids.iter().all(|id| id.trim().is_empty()),
            FieldValue::Count(_) | FieldValue::Float(_) | FieldValue::Duration(_) => false,
        }
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<u32> for FieldValue {
    fn from(n: u32) -> Self {
        FieldValue::Count(n)
    }
}

impl From<f64> for FieldValue {
    fn from(x: f64) -> Self {
        FieldValue::Float(x)
    }
}

impl From<Duration> for FieldValue {
    fn from(d: Duration) -> Self {
        FieldValue::Duration(d)
    }
}

impl From<PathBuf> for FieldValue {
    fn from(p: PathBuf) -> Self {
        FieldValue::Path(p)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(ids: Vec<String>) -> Self {
        FieldValue::Ids(ids)
    }
}

/// The values a template is rendered against.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    values: FxHashMap<Field, FieldValue>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, field: Field, value: impl Into<FieldValue>) -> &mut Self {
        self.values.insert(field, value.into());
        self
    }

    /// Set a field when `value` is present; leave it absent otherwise.
    pub fn set_opt<V: Into<FieldValue>>(&mut self, field: Field, value: Option<V>) -> &mut Self {
        match value {
            Some(v) => {
                self.values.insert(field, v.into());
            }
            None => {
                self.values.remove(&field);
            }
        }
        self
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.values.get(&field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.values.contains_key(&field)
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn count(&self, field: Field) -> Option<u32> {
        self.get(field).and_then(FieldValue::as_count)
    }

    pub fn path(&self, field: Field) -> Option<&Path> {
        self.get(field).and_then(FieldValue::as_path)
    }
}

/// Output of a formatter: nothing, one line, or several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formatted {
    Skip,
    One(String),
    Many(Vec<String>),
}

impl Formatted {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Formatted::Skip => Vec::new(),
            Formatted::One(line) => vec![line],
            Formatted::Many(lines) => lines,
        }
    }
}

impl From<String> for Formatted {
    fn from(line: String) -> Self {
        Formatted::One(line)
    }
}

impl From<Option<String>> for Formatted {
    fn from(line: Option<String>) -> Self {
        line.map_or(Formatted::Skip, Formatted::One)
    }
}

impl From<Vec<String>> for Formatted {
    fn from(lines: Vec<String>) -> Self {
        Formatted::Many(lines)
    }
}

/// Formats the primary field value; the whole set is passed for the
/// secondary values some directives combine (e.g. ppn with workers).
pub type FormatFn = fn(&FieldValue, &FieldSet) -> Formatted;

/// One entry of a header table.
#[derive(Debug, Clone, Copy)]
pub enum Directive {
    /// A flag emitted unconditionally, e.g. `-V`.
    Flag(&'static str),
    /// A formatted field; the formatter returns whole payload lines.
    Field(Field, FormatFn),
    /// Several fields joined into one flag value, e.g. PBS `-l a,b,c`.
    /// Absent parts are dropped; the line is dropped if every part is.
    Joined {
        flag: &'static str,
        separator: &'static str,
        parts: &'static [(Field, FormatFn)],
    },
}

/// Apply `format` to `field` only when the field is present and not blank.
pub fn guarded(field: Field, format: FormatFn, fields: &FieldSet) -> Formatted {
    match fields.get(field) {
        Some(value) if !value.is_blank() => format(value, fields),
        _ => Formatted::Skip,
    }
}

/// A scheduler's header: comment token plus ordered directive table.
#[derive(Debug, Clone, Copy)]
pub struct HeaderTemplate {
    pub token: &'static str,
    pub directives: &'static [Directive],
}

impl HeaderTemplate {
    pub const fn new(token: &'static str, directives: &'static [Directive]) -> Self {
        Self { token, directives }
    }

    /// Payloads without the comment token, residue removed.
    pub fn payloads(&self, fields: &FieldSet) -> Vec<String> {
        let mut out = Vec::new();

        for directive in self.directives {
            match directive {
                Directive::Flag(flag) => out.push((*flag).to_string()),
                Directive::Field(field, format) => {
                    out.extend(guarded(*field, *format, fields).into_vec());
                }
                Directive::Joined {
                    flag,
                    separator,
                    parts,
                } => {
                    let items: Vec<String> = parts
                        .iter()
                        .flat_map(|(field, format)| guarded(*field, *format, fields).into_vec())
                        .filter(|item| !is_residue(item))
                        .collect();
                    if !items.is_empty() {
                        out.push(format!("{} {}", flag, items.join(separator)));
                    }
                }
            }
        }

        out.retain(|payload| !is_residue(payload));
        out
    }

    /// Header lines, each prefixed with the scheduler token.
    pub fn lines(&self, fields: &FieldSet) -> Vec<String> {
        self.payloads(fields)
            .into_iter()
            .map(|payload| {
                if self.token.is_empty() {
                    payload
                } else {
                    format!("{} {}", self.token, payload)
                }
            })
            .collect()
    }

    pub fn render(&self, fields: &FieldSet) -> String {
        self.lines(fields).join("\n")
    }
}

/// Blank payloads are residue: a formatter that had nothing to say.
/// Payload text is never inspected further, so values such as `run:` or
/// `key=` survive intact.
fn is_residue(payload: &str) -> bool {
    payload.trim().is_empty()
}
