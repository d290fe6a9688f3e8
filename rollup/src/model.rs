//! Metric definitions, measurement points and graph requests/results.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rollup_storage::{AggregateRecord, TimestepDefinition, UnixTime};

/// How a metric's values are stored. Only packed count/sum/min/max exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Count, sum, min and max per sub-step.
    #[default]
    Aggregate,
}

/// A validated metric, as handed out by the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    /// Lookup name.
    pub name: String,
    /// Prefix of every bucket key.
    pub key: String,
    /// Tag names; tag values are positional against this list.
    pub tags: Vec<String>,
    /// Resolutions every write fans out to.
    pub timesteps: Vec<Arc<TimestepDefinition>>,
    /// Storage kind.
    pub kind: MetricKind,
}

impl MetricDefinition {
    /// Position of `tag` in the tag list.
    pub fn tag_index(&self, tag: &str) -> Option<usize> {
        self.tags.iter().position(|t| t == tag)
    }

    /// Attached timestep named `name`.
    pub fn timestep(&self, name: &str) -> Option<&Arc<TimestepDefinition>> {
        self.timesteps.iter().find(|t| t.name == name)
    }

    /// Pair tag names with `values`.
    pub fn tag_map(&self, values: &[String]) -> BTreeMap<String, String> {
        self.tags
            .iter()
            .cloned()
            .zip(values.iter().cloned())
            .collect()
    }
}

/// One measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPoint {
    /// Metric name.
    pub metric: String,
    /// Tag values in the metric's tag order.
    pub tag_values: Vec<String>,
    /// When the value was observed.
    pub timestamp: DateTime<Utc>,
    /// Observed value.
    pub value: f64,
}

/// Reduction applied to each stored record at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    /// Number of values.
    Count,
    /// Sum of values.
    Sum,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// `sum / count`.
    Avg,
}

impl AggregateFn {
    /// Reduce a record to one scalar.
    pub fn apply(self, record: &AggregateRecord) -> f64 {
        match self {
            Self::Count => f64::from(record.count),
            Self::Sum => record.sum,
            Self::Min => record.min,
            Self::Max => record.max,
            Self::Avg => record.average(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
        }
    }
}

impl fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateFn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "avg" | "mean" => Ok(Self::Avg),
            other => Err(format!("unknown aggregate function {other:?}")),
        }
    }
}

/// Parameters of one graph query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRequest {
    /// Metric name.
    pub metric: String,
    /// Tag values in the metric's tag order.
    pub tag_values: Vec<String>,
    /// Timestep name; must be attached to the metric.
    pub timestep: String,
    /// Reduction applied to each record.
    pub function: AggregateFn,
    /// Emit `0` for sub-steps without data instead of skipping them.
    pub fill_zero: bool,
    /// Number of points; the timestep default when unset or zero.
    pub steps: Option<usize>,
}

impl GraphRequest {
    /// Step count after applying the override rule, capped at the two
    /// periods a graph reads.
    pub fn step_count(&self, timestep: &TimestepDefinition) -> usize {
        let n = match self.steps {
            Some(n) if n > 0 => n,
            _ => timestep.steps,
        };
        n.min(timestep.max_steps())
    }

    /// Copy of this request with one tag position replaced.
    pub fn with_tag_value(&self, index: usize, value: &str) -> Self {
        let mut derived = self.clone();
        if let Some(slot) = derived.tag_values.get_mut(index) {
            *slot = value.to_string();
        }
        derived
    }
}

/// A reconstructed point series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSeries {
    /// Tag name to tag value for the queried series.
    pub tags: BTreeMap<String, String>,
    /// `(timestamp, value)` pairs in ascending timestamp order.
    pub values: Vec<(UnixTime, f64)>,
}

impl GraphSeries {
    /// Values only, for sparklines.
    pub fn spark(&self) -> Vec<f64> {
        self.values.iter().map(|(_, v)| *v).collect()
    }
}

/// Space separated values.
impl fmt::Display for GraphSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (_, v)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}
