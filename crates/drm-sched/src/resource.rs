//! Resource requests: memory, workers, wall time and constraints.
//!
//! A request is backend-agnostic; [`Resource::render`] hands its fields to
//! the backend's resource template to produce scheduler directives.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::{DrmError, DrmResult};
use crate::template::{Field, FieldSet};

/// Default memory request in gigabytes.
pub const DEFAULT_MEMORY_GB: f64 = 1.0;

/// Default worker count.
pub const DEFAULT_WORKERS: u32 = 1;

/// Default wall-clock limit (59 minutes).
pub const DEFAULT_WALLTIME: Duration = Duration::from_secs(59 * 60);

/// A free-text hardware or feature tag (`intel`, `gpu`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Constraint(pub String);

impl Constraint {
    pub fn new(features: impl Into<String>) -> Self {
        Self(features.into())
    }

    /// An empty constraint renders as nothing.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn features(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Constraint {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A plain resource request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    /// Total memory in gigabytes.
    pub memory_gb: Option<f64>,
    /// Number of workers (cores).
    pub workers: Option<u32>,
    /// Wall-clock limit.
    #[serde(with = "walltime_serde")]
    pub time: Option<Duration>,
    pub constraint: Option<Constraint>,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            memory_gb: Some(DEFAULT_MEMORY_GB),
            workers: Some(DEFAULT_WORKERS),
            time: Some(DEFAULT_WALLTIME),
            constraint: None,
        }
    }
}

impl ResourceSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory request. Negative values clamp to zero.
    pub fn with_memory_gb(mut self, memory_gb: f64) -> Self {
        self.memory_gb = Some(memory_gb.max(0.0));
        self
    }

    /// Set the worker count. Zero clamps to one.
    pub fn with_workers(mut self, workers: u32) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    pub fn with_time(mut self, time: Duration) -> Self {
        self.time = Some(time);
        self
    }

    /// Drop the wall-clock directive entirely.
    pub fn without_time(mut self) -> Self {
        self.time = None;
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<Constraint>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    fn fill(&self, fields: &mut FieldSet) {
        fields
            .set_opt(Field::Memory, self.memory_gb)
            .set_opt(Field::Workers, self.workers)
            .set_opt(Field::Time, self.time)
            .set_opt(
                Field::Constraint,
                self.constraint
                    .as_ref()
                    .filter(|c| !c.is_empty())
                    .map(|c| c.0.clone()),
            );
    }
}

/// An MPI resource request: a plain request plus processes per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpiResourceSpec {
    #[serde(flatten)]
    pub base: ResourceSpec,
    /// Processes per node. `None` leaves the per-node layout to the scheduler.
    pub ppn: Option<u32>,
}

impl Default for MpiResourceSpec {
    fn default() -> Self {
        Self {
            base: ResourceSpec::default(),
            ppn: Some(1),
        }
    }
}

impl MpiResourceSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(mut self, base: ResourceSpec) -> Self {
        self.base = base;
        self
    }

    /// Set processes per node. Zero clamps to one.
    pub fn with_ppn(mut self, ppn: u32) -> Self {
        self.ppn = Some(ppn.max(1));
        self
    }

    pub fn without_ppn(mut self) -> Self {
        self.ppn = None;
        self
    }
}

/// Which resource template a backend should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceVariant {
    Standard,
    Mpi,
}

/// A resource request of either kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Standard(ResourceSpec),
    Mpi(MpiResourceSpec),
}

impl Default for Resource {
    fn default() -> Self {
        Resource::Standard(ResourceSpec::default())
    }
}

impl From<ResourceSpec> for Resource {
    fn from(spec: ResourceSpec) -> Self {
        Resource::Standard(spec)
    }
}

impl From<MpiResourceSpec> for Resource {
    fn from(spec: MpiResourceSpec) -> Self {
        Resource::Mpi(spec)
    }
}

impl Resource {
    pub fn variant(&self) -> ResourceVariant {
        match self {
            Resource::Standard(_) => ResourceVariant::Standard,
            Resource::Mpi(_) => ResourceVariant::Mpi,
        }
    }

    /// Field set consumed by the backend's resource template.
    pub fn fields(&self) -> FieldSet {
        let mut fields = FieldSet::new();
        match self {
            Resource::Standard(spec) => spec.fill(&mut fields),
            Resource::Mpi(spec) => {
                spec.base.fill(&mut fields);
                fields.set_opt(Field::Ppn, spec.ppn);
            }
        }
        fields
    }

    /// Render the scheduler-specific directive block.
    pub fn render(&self, backend: &dyn Backend) -> String {
        let mut fields = self.fields();
        backend.extend_fields(&mut fields);
        backend.resource_template(self.variant()).render(&fields)
    }
}

/// Format a duration as `HH:MM:00`; hours may exceed 24.
pub fn format_walltime(time: Duration) -> String {
    let total = time.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    format!("{hours:02}:{minutes:02}:00")
}

/// Parse `HH:MM:SS`, `HH:MM` or plain minutes.
pub fn parse_walltime(s: &str) -> DrmResult<Duration> {
    let invalid = || DrmError::InvalidWalltime(s.to_string());
    let parts: Vec<&str> = s.trim().split(':').collect();

    let numbers = parts
        .iter()
        .map(|p| p.trim().parse::<u64>().map_err(|_| invalid()))
        .collect::<DrmResult<Vec<u64>>>()?;

    let secs = match numbers.as_slice() {
        [h, m, s] => h * 3600 + m * 60 + s,
        [h, m] => h * 3600 + m * 60,
        [m] => m * 60,
        _ => return Err(invalid()),
    };

    Ok(Duration::from_secs(secs))
}

mod walltime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match time {
            Some(t) => {
                let secs = t.as_secs();
                s.serialize_str(&format!(
                    "{:02}:{:02}:{:02}",
                    secs / 3600,
                    (secs % 3600) / 60,
                    secs % 60
                ))
            }
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        raw.map(|s| super::parse_walltime(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_walltime() {
        assert_eq!(format_walltime(DEFAULT_WALLTIME), "00:59:00");
        assert_eq!(
            format_walltime(Duration::from_secs(2 * 86400 + 6 * 60)),
            "48:06:00"
        );
        // Seconds below a minute are dropped.
        assert_eq!(format_walltime(Duration::from_secs(90)), "00:01:00");
    }

    #[test]
    fn test_parse_walltime() {
        assert_eq!(
            parse_walltime("01:30:00").unwrap(),
            Duration::from_secs(5400)
        );
        assert_eq!(parse_walltime("2:15").unwrap(), Duration::from_secs(8100));
        assert_eq!(parse_walltime("45").unwrap(), Duration::from_secs(2700));
        assert!(parse_walltime("1:2:3:4").is_err());
        assert!(parse_walltime("abc").is_err());
    }

    #[test]
    fn test_defaults() {
        let spec = ResourceSpec::default();
        assert_eq!(spec.memory_gb, Some(1.0));
        assert_eq!(spec.workers, Some(1));
        assert_eq!(spec.time, Some(Duration::from_secs(59 * 60)));
        assert!(spec.constraint.is_none());

        assert_eq!(MpiResourceSpec::default().ppn, Some(1));
    }

    #[test]
    fn test_builders_clamp() {
        let spec = ResourceSpec::new().with_memory_gb(-3.0).with_workers(0);
        assert_eq!(spec.memory_gb, Some(0.0));
        assert_eq!(spec.workers, Some(1));
        assert_eq!(MpiResourceSpec::new().with_ppn(0).ppn, Some(1));
    }

    #[test]
    fn test_empty_constraint_not_in_fields() {
        let fields = Resource::from(ResourceSpec::new().with_constraint("")).fields();
        assert!(!fields.contains(Field::Constraint));

        let fields = Resource::from(ResourceSpec::new().with_constraint("intel")).fields();
        assert_eq!(fields.text(Field::Constraint), Some("intel"));
    }

    #[test]
    fn test_resource_yaml() {
        let spec: ResourceSpec =
            serde_yaml_ng::from_str("memory_gb: 2.5\ntime: \"01:30:00\"\nconstraint: gpu\n")
                .unwrap();
        assert_eq!(spec.memory_gb, Some(2.5));
        assert_eq!(spec.workers, Some(1));
        assert_eq!(spec.time, Some(Duration::from_secs(5400)));
        assert_eq!(spec.constraint, Some(Constraint::new("gpu")));

        let mpi: MpiResourceSpec = serde_yaml_ng::from_str("workers: 8\nppn: 4\n").unwrap();
        assert_eq!(mpi.base.workers, Some(8));
        assert_eq!(mpi.ppn, Some(4));
    }
}
