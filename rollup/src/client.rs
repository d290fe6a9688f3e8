//! Validating front door over the catalog and the engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use rollup_storage::{BucketStore, SEP};

use crate::catalog::Catalog;
use crate::engine::Engine;
use crate::error::{Result, RollupError};
use crate::model::{GraphRequest, GraphSeries, MeasurementPoint, MetricDefinition};

/// Entry point for applications: resolves names against the catalog and
/// validates input before it reaches the engine.
#[derive(Clone)]
pub struct Client {
    catalog: Arc<Catalog>,
    engine: Engine,
}

impl Client {
    /// Client over a built catalog and a store.
    pub fn new(catalog: Catalog, store: Arc<dyn BucketStore>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            engine: Engine::new(store),
        }
    }

    /// Definitions this client serves.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Underlying engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn metric(&self, name: &str, tag_values: &[String]) -> Result<&Arc<MetricDefinition>> {
        let metric = self
            .catalog
            .metric(name)
            .ok_or_else(|| RollupError::UnknownMetric(name.to_string()))?;
        if tag_values.len() != metric.tags.len() {
            return Err(RollupError::TagCount {
                metric: metric.name.clone(),
                expected: metric.tags.len(),
                got: tag_values.len(),
            });
        }
        Ok(metric)
    }

    fn check_tag_value(value: &str) -> Result<()> {
        if value.contains(SEP) {
            return Err(RollupError::InvalidTagValue(value.to_string()));
        }
        Ok(())
    }

    /// Record one measurement in every timestep of its metric.
    pub async fn write(&self, point: &MeasurementPoint) -> Result<()> {
        let metric = self.metric(&point.metric, &point.tag_values)?;
        for value in &point.tag_values {
            Self::check_tag_value(value)?;
        }
        self.engine.write(metric, point).await
    }

    fn graph_metric(&self, request: &GraphRequest) -> Result<&Arc<MetricDefinition>> {
        let metric = self.metric(&request.metric, &request.tag_values)?;
        for value in &request.tag_values {
            Self::check_tag_value(value)?;
        }
        let step = metric
            .timestep(&request.timestep)
            .ok_or_else(|| RollupError::TimestepNotInMetric {
                metric: metric.name.clone(),
                timestep: request.timestep.clone(),
            })?;
        match request.steps {
            Some(requested) if requested > step.max_steps() => Err(RollupError::StepCount {
                timestep: step.name.clone(),
                requested,
                max: step.max_steps(),
            }),
            _ => Ok(metric),
        }
    }

    /// Graph one series as of now.
    pub async fn graph(&self, request: &GraphRequest) -> Result<GraphSeries> {
        self.graph_at(request, Utc::now()).await
    }

    /// Graph one series as of `now`.
    pub async fn graph_at(&self, request: &GraphRequest, now: DateTime<Utc>) -> Result<GraphSeries> {
        let metric = self.graph_metric(request)?;
        self.engine.graph_at(metric, request, now).await
    }

    /// Graph `request` once per value of `tag`.
    pub async fn graph_each_tag(
        &self,
        request: &GraphRequest,
        tag: &str,
        values: &[String],
    ) -> Result<Vec<GraphSeries>> {
        self.graph_each_tag_at(request, tag, values, Utc::now()).await
    }

    /// Graph `request` once per value of `tag`, all as of `now`.
    pub async fn graph_each_tag_at(
        &self,
        request: &GraphRequest,
        tag: &str,
        values: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<GraphSeries>> {
        let metric = self.graph_metric(request)?;
        for value in values {
            Self::check_tag_value(value)?;
        }
        self.engine
            .graph_each_tag_at(metric, request, tag, values, now)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rollup_storage::MemoryStore;

    use crate::catalog::{CatalogBuilder, MetricSpec};
    use crate::model::AggregateFn;

    fn client() -> Client {
        let catalog = CatalogBuilder::with_standard_timesteps()
            .metric(
                MetricSpec::new("impression", "impression")
                    .tags(["app", "cid"])
                    .timesteps(["hour", "day"]),
            )
            .build()
            .unwrap();
        Client::new(catalog, Arc::new(MemoryStore::default()))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 3, 26, 5, 42, 17).unwrap()
    }

    fn point(metric: &str, tags: &[&str]) -> MeasurementPoint {
        MeasurementPoint {
            metric: metric.into(),
            tag_values: tags.iter().map(|t| t.to_string()).collect(),
            timestamp: now(),
            value: 1.0,
        }
    }

    fn request(timestep: &str, tags: &[&str]) -> GraphRequest {
        GraphRequest {
            metric: "impression".into(),
            tag_values: tags.iter().map(|t| t.to_string()).collect(),
            timestep: timestep.into(),
            function: AggregateFn::Count,
            fill_zero: false,
            steps: None,
        }
    }

    #[tokio::test]
    async fn write_validation() {
        let client = client();
        assert!(matches!(
            client.write(&point("clicks", &["a", "b"])).await,
            Err(RollupError::UnknownMetric(name)) if name == "clicks"
        ));
        assert!(matches!(
            client.write(&point("impression", &["a"])).await,
            Err(RollupError::TagCount { expected: 2, got: 1, .. })
        ));
        assert!(matches!(
            client.write(&point("impression", &["a:b", "c"])).await,
            Err(RollupError::InvalidTagValue(v)) if v == "a:b"
        ));
        client.write(&point("impression", &["a", "b"])).await.unwrap();
    }

    #[tokio::test]
    async fn graph_validation_and_round_trip() {
        let client = client();
        assert!(matches!(
            client.graph_at(&request("month", &["a", "b"]), now()).await,
            Err(RollupError::TimestepNotInMetric { timestep, .. }) if timestep == "month"
        ));
        assert!(matches!(
            client.graph_at(&request("hour", &[]), now()).await,
            Err(RollupError::TagCount { expected: 2, got: 0, .. })
        ));

        client.write(&point("impression", &["a", "b"])).await.unwrap();
        let series = client.graph_at(&request("day", &["a", "b"]), now()).await.unwrap();
        let hour_start = 1_427_346_000;
        assert_eq!(series.values, vec![(hour_start, 1.0)]);

        let sweep = client
            .graph_each_tag_at(&request("hour", &["a", "b"]), "cid", &["b".into(), "z".into()], now())
            .await
            .unwrap();
        assert_eq!(sweep[0].values.len(), 1);
        assert!(sweep[1].values.is_empty());
        assert_eq!(sweep[1].tags["cid"], "z");
    }

    #[tokio::test]
    async fn oversized_step_override_is_rejected() {
        let client = client();
        let mut req = request("hour", &["a", "b"]);
        req.steps = Some(usize::MAX);
        assert!(matches!(
            client.graph_at(&req, now()).await,
            Err(RollupError::StepCount { requested: usize::MAX, max: 120, .. })
        ));
        req.steps = Some(120);
        req.fill_zero = true;
        assert_eq!(client.graph_at(&req, now()).await.unwrap().values.len(), 120);
    }

    #[tokio::test]
    async fn separator_in_graph_tags_is_rejected() {
        let client = client();
        assert!(matches!(
            client.graph_at(&request("hour", &["a:b", "c"]), now()).await,
            Err(RollupError::InvalidTagValue(v)) if v == "a:b"
        ));
        assert!(matches!(
            client
                .graph_each_tag_at(&request("hour", &["a", "b"]), "cid", &["ok".into(), "x:y".into()], now())
                .await,
            Err(RollupError::InvalidTagValue(v)) if v == "x:y"
        ));
    }
}
