//! Multi-resolution time-series rollups.
//!
//! Every measurement is folded into one count/sum/min/max record per
//! configured timestep (hour, day, month, year, ...) inside a store-side hash
//! bucket, so graphs are read back without scanning raw points.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use rollup::{Client, RollupConfig};
//!
//! let config = RollupConfig::load("rollup.yaml")?;
//! let client = Client::new(config.catalog()?, config.open_store().await?);
//! # let _ = client;
//! # Ok(())
//! # }
//! ```
#![deny(missing_docs)]

pub mod catalog;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;

pub use catalog::{Catalog, CatalogBuilder, CatalogError, MetricSpec};
pub use client::Client;
pub use config::{LoggingConfig, MergeStrategy, RollupConfig, StoreConfig};
pub use engine::Engine;
pub use error::{Result, RollupError};
pub use model::{
    AggregateFn, GraphRequest, GraphSeries, MeasurementPoint, MetricDefinition, MetricKind,
};
