//! Immutable set of validated metric and timestep definitions.
//!
//! Built once with [`CatalogBuilder`]; every uniqueness and reference check
//! happens in [`CatalogBuilder::build`], after which the catalog is read-only
//! and shared behind `Arc`s.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use rollup_storage::{TimestepDefinition, SEP};

use crate::model::{MetricDefinition, MetricKind};

/// Fewest periods a bucket must live: its own and the one after it.
pub const MIN_RETENTION: u32 = 2;

/// Reasons a catalog cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// Two timesteps share a name.
    #[error("timestep {0:?} is defined twice")]
    DuplicateTimestep(String),
    /// Two timesteps share a key code.
    #[error("timestep key {0:?} is used twice")]
    DuplicateTimestepKey(String),
    /// Two metrics share a name.
    #[error("metric {0:?} is defined twice")]
    DuplicateMetric(String),
    /// A metric repeats a tag name.
    #[error("metric {metric:?} repeats tag {tag:?}")]
    DuplicateTag {
        /// Metric name.
        metric: String,
        /// Repeated tag.
        tag: String,
    },
    /// A metric lists no timesteps.
    #[error("metric {0:?} has no timesteps")]
    NoTimesteps(String),
    /// A metric references a timestep that is not defined.
    #[error("metric {metric:?} references unknown timestep {timestep:?}")]
    UnknownTimestep {
        /// Metric name.
        metric: String,
        /// Missing timestep.
        timestep: String,
    },
    /// A timestep's default step count is zero or exceeds two periods.
    #[error("timestep {name:?} has {steps} steps, expected 1..={max}")]
    InvalidSteps {
        /// Timestep name.
        name: String,
        /// Configured steps.
        steps: usize,
        /// Largest accepted value.
        max: usize,
    },
    /// Buckets would expire before a graph can read the previous period.
    #[error("timestep {name:?} retains {retention} periods, at least 2 needed")]
    ShortRetention {
        /// Timestep name.
        name: String,
        /// Configured retention.
        retention: u32,
    },
    /// A name, key or code is empty or contains the key separator.
    #[error("invalid {what} {value:?}")]
    InvalidName {
        /// Which field was rejected.
        what: &'static str,
        /// Rejected value.
        value: String,
    },
}

/// Metric as written in configuration: timesteps referenced by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Lookup name.
    pub name: String,
    /// Bucket key prefix.
    pub key: String,
    /// Ordered tag names.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Names of the timesteps to maintain.
    pub timesteps: Vec<String>,
    /// Storage kind.
    #[serde(default)]
    pub kind: MetricKind,
}

impl MetricSpec {
    /// Spec with the given identity and no tags or timesteps.
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            tags: Vec::new(),
            timesteps: Vec::new(),
            kind: MetricKind::Aggregate,
        }
    }

    /// Set the tag names.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the timestep names.
    pub fn timesteps<I, S>(mut self, timesteps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.timesteps = timesteps.into_iter().map(Into::into).collect();
        self
    }
}

fn check_name(what: &'static str, value: &str) -> Result<(), CatalogError> {
    if value.is_empty() || value.contains(SEP) {
        return Err(CatalogError::InvalidName {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Collects definitions; nothing is validated until [`CatalogBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct CatalogBuilder {
    timesteps: Vec<TimestepDefinition>,
    metrics: Vec<MetricSpec>,
}

impl CatalogBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder preloaded with hour, day, month and year.
    pub fn with_standard_timesteps() -> Self {
        Self {
            timesteps: TimestepDefinition::standard(),
            metrics: Vec::new(),
        }
    }

    /// Add a timestep definition.
    pub fn timestep(mut self, timestep: TimestepDefinition) -> Self {
        self.timesteps.push(timestep);
        self
    }

    /// Add a metric.
    pub fn metric(mut self, metric: MetricSpec) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Validate everything and freeze it.
    pub fn build(self) -> Result<Catalog, CatalogError> {
        let mut timesteps = BTreeMap::new();
        let mut codes = BTreeSet::new();
        for step in self.timesteps {
            check_name("timestep name", &step.name)?;
            check_name("timestep key", &step.key)?;
            if step.steps == 0 || step.steps > step.max_steps() {
                return Err(CatalogError::InvalidSteps {
                    max: step.max_steps(),
                    steps: step.steps,
                    name: step.name,
                });
            }
            if step.retention < MIN_RETENTION {
                return Err(CatalogError::ShortRetention {
                    name: step.name,
                    retention: step.retention,
                });
            }
            if !codes.insert(step.key.clone()) {
                return Err(CatalogError::DuplicateTimestepKey(step.key));
            }
            match timesteps.entry(step.name.clone()) {
                Entry::Occupied(_) => return Err(CatalogError::DuplicateTimestep(step.name)),
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(step));
                }
            }
        }

        let mut metrics = BTreeMap::new();
        for spec in self.metrics {
            check_name("metric name", &spec.name)?;
            check_name("metric key", &spec.key)?;
            if metrics.contains_key(&spec.name) {
                return Err(CatalogError::DuplicateMetric(spec.name));
            }
            if spec.timesteps.is_empty() {
                return Err(CatalogError::NoTimesteps(spec.name));
            }
            let mut seen = BTreeSet::new();
            for tag in &spec.tags {
                check_name("tag name", tag)?;
                if !seen.insert(tag) {
                    return Err(CatalogError::DuplicateTag {
                        metric: spec.name.clone(),
                        tag: tag.clone(),
                    });
                }
            }
            let resolved = spec
                .timesteps
                .iter()
                .map(|name| {
                    timesteps
                        .get(name)
                        .cloned()
                        .ok_or_else(|| CatalogError::UnknownTimestep {
                            metric: spec.name.clone(),
                            timestep: name.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let metric = MetricDefinition {
                name: spec.name.clone(),
                key: spec.key,
                tags: spec.tags,
                timesteps: resolved,
                kind: spec.kind,
            };
            metrics.insert(spec.name, Arc::new(metric));
        }

        Ok(Catalog { timesteps, metrics })
    }
}

/// Frozen definitions keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    timesteps: BTreeMap<String, Arc<TimestepDefinition>>,
    metrics: BTreeMap<String, Arc<MetricDefinition>>,
}

impl Catalog {
    /// Metric by name.
    pub fn metric(&self, name: &str) -> Option<&Arc<MetricDefinition>> {
        self.metrics.get(name)
    }

    /// Timestep by name.
    pub fn timestep(&self, name: &str) -> Option<&Arc<TimestepDefinition>> {
        self.timesteps.get(name)
    }

    /// All metrics, ordered by name.
    pub fn metrics(&self) -> impl Iterator<Item = &Arc<MetricDefinition>> {
        self.metrics.values()
    }

    /// All timesteps, ordered by name.
    pub fn timesteps(&self) -> impl Iterator<Item = &Arc<TimestepDefinition>> {
        self.timesteps.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollup_storage::Granularity;

    fn impression() -> MetricSpec {
        MetricSpec::new("impression", "impression")
            .tags(["app", "cid"])
            .timesteps(["hour", "day", "month", "year"])
    }

    #[test]
    fn builds_and_shares_timesteps() {
        let catalog = CatalogBuilder::with_standard_timesteps()
            .metric(impression())
            .metric(MetricSpec::new("click", "clk").timesteps(["hour"]))
            .build()
            .unwrap();
        let imp = catalog.metric("impression").unwrap();
        assert_eq!(imp.timesteps.len(), 4);
        assert!(Arc::ptr_eq(&imp.timesteps[0], catalog.timestep("hour").unwrap()));
        assert_eq!(catalog.metrics().count(), 2);
        assert_eq!(catalog.timesteps().count(), 4);
        assert!(catalog.metric("missing").is_none());
    }

    #[test]
    fn rejects_duplicates() {
        let err = CatalogBuilder::with_standard_timesteps()
            .timestep(TimestepDefinition::hour())
            .build()
            .unwrap_err();
        assert_eq!(err, CatalogError::DuplicateTimestepKey("h".into()));

        let err = CatalogBuilder::with_standard_timesteps()
            .timestep(TimestepDefinition::new("hour", "h2", Granularity::Hour, 60, 2))
            .build()
            .unwrap_err();
        assert_eq!(err, CatalogError::DuplicateTimestep("hour".into()));

        let err = CatalogBuilder::with_standard_timesteps()
            .metric(impression())
            .metric(impression())
            .build()
            .unwrap_err();
        assert_eq!(err, CatalogError::DuplicateMetric("impression".into()));

        let err = CatalogBuilder::with_standard_timesteps()
            .metric(impression().tags(["app", "app"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateTag { .. }));
    }

    #[test]
    fn rejects_bad_references_and_names() {
        let err = CatalogBuilder::with_standard_timesteps()
            .metric(MetricSpec::new("m", "m"))
            .build()
            .unwrap_err();
        assert_eq!(err, CatalogError::NoTimesteps("m".into()));

        let err = CatalogBuilder::new()
            .metric(impression())
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownTimestep { ref timestep, .. } if timestep == "hour"));

        let err = CatalogBuilder::with_standard_timesteps()
            .metric(MetricSpec::new("m", "a:b").timesteps(["hour"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidName { what: "metric key", .. }));
    }

    #[test]
    fn rejects_unusable_timesteps() {
        let build = |step| CatalogBuilder::new().timestep(step).build().unwrap_err();
        assert_eq!(
            build(TimestepDefinition::new("flash", "f", Granularity::Hour, 60, 0)),
            CatalogError::ShortRetention { name: "flash".into(), retention: 0 }
        );
        assert_eq!(
            build(TimestepDefinition::new("flash", "f", Granularity::Hour, 60, 1)),
            CatalogError::ShortRetention { name: "flash".into(), retention: 1 }
        );
        assert_eq!(
            build(TimestepDefinition::new("flash", "f", Granularity::Hour, 0, 2)),
            CatalogError::InvalidSteps { name: "flash".into(), steps: 0, max: 120 }
        );
        assert_eq!(
            build(TimestepDefinition::new("flash", "f", Granularity::Year, 25, 2)),
            CatalogError::InvalidSteps { name: "flash".into(), steps: 25, max: 24 }
        );
        CatalogBuilder::new()
            .timestep(TimestepDefinition::new("week", "w", Granularity::Day, 48, 2))
            .build()
            .unwrap();
    }
}
