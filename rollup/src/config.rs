//! YAML configuration for `rollupctl` and embedding applications.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::Level;

use rollup_redis::RedisStore;
use rollup_storage::{BucketStore, OptimisticMerge, TimestepDefinition, DEFAULT_MAX_ATTEMPTS};

use crate::catalog::{Catalog, CatalogBuilder, MetricSpec};

/// How merges are made atomic on the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Server-side Lua script.
    #[default]
    Script,
    /// WATCH/MULTI/EXEC retry loop.
    Optimistic,
}

/// Store connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL.
    pub url: String,
    /// Merge strategy.
    pub merge: MergeStrategy,
    /// Attempts per merge under the optimistic strategy.
    pub max_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            merge: MergeStrategy::Script,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for rolling JSON logs; stderr when absent.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

impl LoggingConfig {
    /// Parsed `level`.
    pub fn level(&self) -> anyhow::Result<Level> {
        Level::from_str(&self.level).map_err(|_| anyhow::anyhow!("invalid log level {:?}", self.level))
    }
}

/// Whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollupConfig {
    /// Store section.
    #[serde(default)]
    pub store: StoreConfig,
    /// Logging section.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Timesteps in addition to hour, day, month and year.
    #[serde(default)]
    pub timesteps: Vec<TimestepDefinition>,
    /// Metric definitions.
    pub metrics: Vec<MetricSpec>,
}

impl RollupConfig {
    /// Read and parse a YAML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parse YAML text.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate the definitions into a catalog.
    pub fn catalog(&self) -> anyhow::Result<Catalog> {
        let builder = self
            .timesteps
            .iter()
            .cloned()
            .fold(CatalogBuilder::with_standard_timesteps(), CatalogBuilder::timestep);
        let builder = self
            .metrics
            .iter()
            .cloned()
            .fold(builder, CatalogBuilder::metric);
        Ok(builder.build()?)
    }

    /// Connect to the configured store with the configured merge strategy.
    pub async fn open_store(&self) -> anyhow::Result<Arc<dyn BucketStore>> {
        let redis = RedisStore::connect(&self.store.url)
            .await
            .context("connecting to redis")?;
        let store: Arc<dyn BucketStore> = match self.store.merge {
            MergeStrategy::Script => {
                redis.load_script().await.context("loading merge script")?;
                Arc::new(redis)
            }
            MergeStrategy::Optimistic => {
                Arc::new(OptimisticMerge::new(redis, self.store.max_attempts))
            }
        };
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollup_storage::Granularity;

    const SAMPLE: &str = r#"
store:
  url: redis://cache:6380/2
  merge: optimistic
  max_attempts: 4
logging:
  level: debug
  dir: /var/log/rollup
timesteps:
  - name: minute
    key: s
    granularity: minute
    steps: 60
    retention: 5
metrics:
  - name: impression
    key: impression
    tags: [app, cid]
    timesteps: [minute, hour, day, month, year]
  - name: signups
    key: su
    timesteps: [day]
"#;

    #[test]
    fn parses_full_file() {
        let config = RollupConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.store.url, "redis://cache:6380/2");
        assert_eq!(config.store.merge, MergeStrategy::Optimistic);
        assert_eq!(config.store.max_attempts, 4);
        assert_eq!(config.logging.level().unwrap(), Level::DEBUG);
        assert_eq!(config.logging.dir.as_deref(), Some(Path::new("/var/log/rollup")));
        assert_eq!(config.timesteps[0].granularity, Granularity::Minute);

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.timesteps().count(), 5);
        assert_eq!(catalog.metric("impression").unwrap().timesteps.len(), 5);
        assert!(catalog.metric("signups").unwrap().tags.is_empty());
    }

    #[test]
    fn sections_default() {
        let config = RollupConfig::from_yaml("metrics: []").unwrap();
        assert_eq!(config.store, StoreConfig::default());
        assert_eq!(config.store.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.logging.level().unwrap(), Level::INFO);
        assert!(config.logging.dir.is_none());
        assert_eq!(config.catalog().unwrap().timesteps().count(), 4);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(RollupConfig::from_yaml("store: {merge: eventual}\nmetrics: []").is_err());
        let config = RollupConfig::from_yaml(
            "metrics:\n  - {name: m, key: m, timesteps: [week]}",
        )
        .unwrap();
        let err = config.catalog().unwrap_err();
        assert!(err.to_string().contains("unknown timestep"));

        let mut config = RollupConfig::from_yaml("metrics: []").unwrap();
        config.logging.level = "loud".into();
        assert!(config.logging.level().is_err());
    }

    #[test]
    fn load_reads_file() {
        let path = std::env::temp_dir().join(format!("rollup-config-{}.yaml", std::process::id()));
        std::fs::write(&path, SAMPLE).unwrap();
        let config = RollupConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.metrics.len(), 2);
        assert!(RollupConfig::load(&path).is_err());
    }
}
