//! Errors returned by the engine and the client.

use rollup_storage::{DecodeError, StorageError};

/// Result type alias for engine and client operations.
pub type Result<T> = std::result::Result<T, RollupError>;

/// Engine and client errors.
#[derive(Debug, thiserror::Error)]
pub enum RollupError {
    /// No metric with this name in the catalog.
    #[error("no metric named {0:?}")]
    UnknownMetric(String),
    /// Number of tag values differs from the metric's tag count.
    #[error("metric {metric:?} takes {expected} tag values, got {got}")]
    TagCount {
        /// Metric name.
        metric: String,
        /// Tag count of the metric.
        expected: usize,
        /// Tag values supplied.
        got: usize,
    },
    /// A tag value would corrupt the bucket key layout.
    #[error("tag value {0:?} contains the key separator")]
    InvalidTagValue(String),
    /// The requested timestep is not attached to the metric.
    #[error("timestep {timestep:?} is not configured for metric {metric:?}")]
    TimestepNotInMetric {
        /// Metric name.
        metric: String,
        /// Requested timestep.
        timestep: String,
    },
    /// The step override asks for more points than two periods hold.
    #[error("timestep {timestep:?} graphs at most {max} steps, {requested} requested")]
    StepCount {
        /// Timestep name.
        timestep: String,
        /// Requested override.
        requested: usize,
        /// Largest accepted override.
        max: usize,
    },
    /// Tag substitution named a tag the metric does not have.
    #[error("metric {metric:?} has no tag named {tag:?}")]
    TagLookup {
        /// Metric name.
        metric: String,
        /// Requested tag.
        tag: String,
    },
    /// Store failure, including undecodable payloads.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<DecodeError> for RollupError {
    fn from(err: DecodeError) -> Self {
        Self::Storage(StorageError::Decode(err))
    }
}
