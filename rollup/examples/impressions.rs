//! Record a few impressions in memory and print the hourly graph.
use std::sync::Arc;

use chrono::Utc;
use rollup::{AggregateFn, CatalogBuilder, Client, GraphRequest, MeasurementPoint, MetricSpec};
use rollup_storage::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let catalog = CatalogBuilder::with_standard_timesteps()
        .metric(
            MetricSpec::new("impression", "impression")
                .tags(["app", "cid"])
                .timesteps(["hour", "day", "month", "year"]),
        )
        .build()?;
    let client = Client::new(catalog, Arc::new(MemoryStore::default()));

    for value in [2.2, 2.2, 5.0] {
        let point = MeasurementPoint {
            metric: "impression".into(),
            tag_values: vec!["web".into(), "42".into()],
            timestamp: Utc::now(),
            value,
        };
        client.write(&point).await?;
    }

    let request = GraphRequest {
        metric: "impression".into(),
        tag_values: vec!["web".into(), "42".into()],
        timestep: "hour".into(),
        function: AggregateFn::Avg,
        fill_zero: false,
        steps: None,
    };
    let series = client.graph(&request).await?;
    println!("{}", serde_json::to_string(&series)?);
    Ok(())
}
