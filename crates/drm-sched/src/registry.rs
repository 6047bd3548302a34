//! Job-name registry.
//!
//! Maps user-chosen job names to scheduler-assigned ids so that holds can be
//! written symbolically. A registry is created by the application and shared
//! (`Arc<JobRegistry>`) by every [`Submitter`](crate::Submitter) of one
//! scheduler session; separate sessions use separate registries.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;

use crate::error::{DrmError, DrmResult};

/// One name or a list of names, as accepted for holds and waiter ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "OneOrMany")]
pub struct Names(Vec<String>);

impl Names {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Names {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(name) => Names(vec![name]),
            OneOrMany::Many(names) => Names(names),
        }
    }
}

impl From<&str> for Names {
    fn from(name: &str) -> Self {
        Names(vec![name.to_string()])
    }
}

impl From<String> for Names {
    fn from(name: String) -> Self {
        Names(vec![name])
    }
}

impl From<Option<&str>> for Names {
    fn from(name: Option<&str>) -> Self {
        Names(name.map(str::to_string).into_iter().collect())
    }
}

impl From<Vec<String>> for Names {
    fn from(names: Vec<String>) -> Self {
        Names(names)
    }
}

impl From<Vec<&str>> for Names {
    fn from(names: Vec<&str>) -> Self {
        names.into_iter().collect()
    }
}

impl From<&[String]> for Names {
    fn from(names: &[String]) -> Self {
        Names(names.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for Names {
    fn from(names: [&str; N]) -> Self {
        names.into_iter().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for Names {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Names(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    named: FxHashMap<String, String>,
    anonymous: FxHashSet<String>,
    /// Every recorded id, in submission order.
    submitted: Vec<String>,
}

/// Thread-safe `name → id` map plus the set of unnamed job ids.
///
/// A name can be recorded once per registry; a second attempt is a
/// [`DrmError::DuplicateName`].
#[derive(Debug, Default)]
pub struct JobRegistry {
    inner: Mutex<RegistryInner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve hold names to job ids, in the order given.
    ///
    /// Empty names and names this registry has never seen are dropped
    /// without error.
    pub fn resolve(&self, hold: &Names) -> Vec<String> {
        let inner = self.lock();
        hold.iter()
            .filter(|name| !name.is_empty())
            .filter_map(|name| inner.named.get(name).cloned())
            .collect()
    }

    /// Record a submission.
    ///
    /// The uniqueness check and the insert happen under one lock. Without an
    /// id (the submit program was absent) the registry is left unchanged,
    /// but a duplicate name is still reported.
    pub fn record(&self, name: Option<&str>, id: Option<&str>) -> DrmResult<()> {
        let mut inner = self.lock();

        if let Some(name) = name {
            if let Some(existing) = inner.named.get(name) {
                return Err(DrmError::DuplicateName {
                    name: name.to_string(),
                    existing: existing.clone(),
                });
            }
        }

        let Some(id) = id else {
            return Ok(());
        };

        match name {
            Some(name) => {
                inner.named.insert(name.to_string(), id.to_string());
            }
            None => {
                inner.anonymous.insert(id.to_string());
            }
        }
        inner.submitted.push(id.to_string());
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().named.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().named.get(name).cloned()
    }

    pub fn is_anonymous(&self, id: &str) -> bool {
        self.lock().anonymous.contains(id)
    }

    /// All recorded ids, named and anonymous, in submission order.
    pub fn jobs(&self) -> Vec<String> {
        self.lock().submitted.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().submitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
