//! Write fan-out and graph reconstruction on top of a [`BucketStore`].
//!
//! The engine trusts its inputs: metric definitions come from a validated
//! catalog and tag values were checked by the caller (see `Client`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use rollup_metrics::{
    GRAPH_FAILURES_TOTAL, GRAPH_LATENCY_SECS, GRAPH_QUERIES_TOTAL, MERGES_TOTAL,
    MERGE_FAILURES_TOTAL,
};
use rollup_storage::{
    build_key, parse_field, AggregateRecord, BucketFields, BucketStore, DecodeError, Granularity,
    MergeRequest, UnixTime,
};

use crate::error::{Result, RollupError};
use crate::model::{AggregateFn, GraphRequest, GraphSeries, MeasurementPoint, MetricDefinition};

/// Stateless engine; clones share the store.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn BucketStore>,
}

impl Engine {
    /// Engine over `store`.
    pub fn new(store: Arc<dyn BucketStore>) -> Self {
        Self { store }
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<dyn BucketStore> {
        &self.store
    }

    /// Merge `point` into one bucket per timestep of `metric`.
    ///
    /// Timesteps are written in order. The first failure is returned and the
    /// remaining timesteps are skipped; merges already applied stay applied.
    #[instrument(skip_all, fields(metric = %metric.name))]
    pub async fn write(&self, metric: &MetricDefinition, point: &MeasurementPoint) -> Result<()> {
        let t = point.timestamp;
        for step in &metric.timesteps {
            let key = build_key(
                &metric.key,
                &point.tag_values,
                step.start_of_period(t, false),
                &step.key,
            );
            let req = MergeRequest {
                key: &key,
                sub_step: step.sub_step_index(t),
                expire_at: step.expire_at(t),
                value: point.value,
            };
            if let Err(err) = self.store.merge(req).await {
                MERGE_FAILURES_TOTAL.inc();
                warn!(%key, timestep = %step.name, error = %err, "merge failed");
                return Err(err.into());
            }
            MERGES_TOTAL.inc();
            debug!(%key, sub_step = req.sub_step, "merged");
        }
        Ok(())
    }

    /// [`Engine::graph_at`] against the wall clock.
    pub async fn graph(&self, metric: &MetricDefinition, request: &GraphRequest) -> Result<GraphSeries> {
        self.graph_at(metric, request, Utc::now()).await
    }

    /// Series for `request` covering the sub-steps that end at the one
    /// containing `now`, read from the current and the previous bucket.
    #[instrument(skip_all, fields(metric = %metric.name, timestep = %request.timestep))]
    pub async fn graph_at(
        &self,
        metric: &MetricDefinition,
        request: &GraphRequest,
        now: DateTime<Utc>,
    ) -> Result<GraphSeries> {
        let started = Instant::now();
        let result = self.reconstruct(metric, request, now).await;
        GRAPH_LATENCY_SECS.observe(started.elapsed().as_secs_f64());
        match &result {
            Ok(series) => {
                GRAPH_QUERIES_TOTAL.inc();
                debug!(points = series.values.len(), "graph served");
            }
            Err(err) => {
                GRAPH_FAILURES_TOTAL.inc();
                warn!(error = %err, "graph failed");
            }
        }
        result
    }

    async fn reconstruct(
        &self,
        metric: &MetricDefinition,
        request: &GraphRequest,
        now: DateTime<Utc>,
    ) -> Result<GraphSeries> {
        let step = metric
            .timestep(&request.timestep)
            .ok_or_else(|| RollupError::TimestepNotInMetric {
                metric: metric.name.clone(),
                timestep: request.timestep.clone(),
            })?;
        let granularity = step.granularity;
        let previous = granularity.period_start(now, true);
        let current = granularity.period_start(now, false);
        let pkey = build_key(&metric.key, &request.tag_values, previous.timestamp(), &step.key);
        let key = build_key(&metric.key, &request.tag_values, current.timestamp(), &step.key);

        let (older, newer) = tokio::try_join!(
            self.store.fetch_bucket(&pkey),
            self.store.fetch_bucket(&key)
        )?;

        let mut points = HashMap::with_capacity(older.len() + newer.len());
        collect(&mut points, granularity, previous, &older, request.function)?;
        collect(&mut points, granularity, current, &newer, request.function)?;

        let values = step
            .bucket_timestamp_list(now, request.step_count(step))
            .into_iter()
            .filter_map(|ts| match points.get(&ts) {
                Some(v) => Some((ts, *v)),
                None if request.fill_zero => Some((ts, 0.0)),
                None => None,
            })
            .collect();

        Ok(GraphSeries {
            tags: metric.tag_map(&request.tag_values),
            values,
        })
    }

    /// [`Engine::graph_each_tag_at`] against the wall clock.
    pub async fn graph_each_tag(
        &self,
        metric: &MetricDefinition,
        base: &GraphRequest,
        tag: &str,
        values: &[String],
    ) -> Result<Vec<GraphSeries>> {
        self.graph_each_tag_at(metric, base, tag, values, Utc::now()).await
    }

    /// One graph per value of `tag`, with every other tag held at `base`.
    /// All graphs share `now` so their timestamps line up.
    pub async fn graph_each_tag_at(
        &self,
        metric: &MetricDefinition,
        base: &GraphRequest,
        tag: &str,
        values: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<GraphSeries>> {
        let index = metric.tag_index(tag).ok_or_else(|| RollupError::TagLookup {
            metric: metric.name.clone(),
            tag: tag.to_string(),
        })?;
        let mut series = Vec::with_capacity(values.len());
        for value in values {
            let request = base.with_tag_value(index, value);
            series.push(self.graph_at(metric, &request, now).await?);
        }
        Ok(series)
    }
}

/// Decode one bucket into `timestamp -> reduced value`.
fn collect(
    into: &mut HashMap<UnixTime, f64>,
    granularity: Granularity,
    period_start: DateTime<Utc>,
    fields: &BucketFields,
    function: AggregateFn,
) -> std::result::Result<(), DecodeError> {
    for (name, payload) in fields {
        let index = parse_field(name).ok_or_else(|| DecodeError::Field(name.clone()))?;
        let record = AggregateRecord::decode(payload)?;
        into.insert(
            granularity.sub_step_timestamp(period_start, index),
            function.apply(&record),
        );
    }
    Ok(())
}
