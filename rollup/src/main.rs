use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use directories::BaseDirs;
use tokio::runtime::Runtime;
use tracing::Level;

use rollup::{AggregateFn, Client, GraphRequest, MeasurementPoint, RollupConfig};

/// Rollup command-line tool.
#[derive(Parser)]
#[command(name = "rollupctl", author, version, about = "Write and graph rollup metrics", long_about = None)]
struct Cli {
    #[command(flatten)]
    opts: Options,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Default)]
struct Options {
    /// Path to configuration file (default: $HOME/.rollup.yaml).
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Log level, overriding the configuration file.
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Print engine counters to stderr before exiting.
    #[arg(long)]
    stats: bool,
}

#[derive(Args)]
struct Query {
    /// Metric name.
    metric: String,
    /// Timestep name, e.g. hour.
    timestep: String,
    /// Tag value, repeated in the metric's tag order.
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// count, sum, min, max or avg.
    #[arg(long, default_value = "sum")]
    function: AggregateFn,
    /// Emit 0 for sub-steps without data.
    #[arg(long)]
    fill_zero: bool,
    /// Number of points instead of the timestep default.
    #[arg(long)]
    steps: Option<usize>,
}

impl Query {
    fn into_request(self) -> GraphRequest {
        GraphRequest {
            metric: self.metric,
            tag_values: self.tags,
            timestep: self.timestep,
            function: self.function,
            fill_zero: self.fill_zero,
            steps: self.steps,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Record one measurement.
    Write {
        /// Metric name.
        metric: String,
        /// Observed value.
        value: f64,
        /// Tag value, repeated in the metric's tag order.
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Observation time (RFC 3339); now when omitted.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Print one series.
    Graph(Query),

    /// Print one series per value of a tag.
    Sweep {
        #[command(flatten)]
        query: Query,
        /// Tag to vary.
        #[arg(long)]
        by: String,
        /// Values substituted for that tag.
        #[arg(long = "value", required = true)]
        values: Vec<String>,
    },

    /// List configured timesteps.
    Timesteps,

    /// List configured metrics.
    Metrics,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .opts
        .config
        .clone()
        .or_else(|| BaseDirs::new().map(|b| b.home_dir().join(".rollup.yaml")))
        .context("no config path given and no home directory")?;
    let config = RollupConfig::load(&config_path)?;

    let level = match &cli.opts.log_level {
        Some(level) => Level::from_str(level).map_err(|_| anyhow::anyhow!("invalid log level {level:?}"))?,
        None => config.logging.level()?,
    };
    let _log = rollup_log::init(config.logging.dir.as_deref(), level)?;

    let rt = Runtime::new()?;
    rt.block_on(run(cli.command, config))?;

    if cli.opts.stats {
        eprint!("{}", rollup_metrics::render()?);
    }
    Ok(())
}

async fn run(command: Commands, config: RollupConfig) -> anyhow::Result<()> {
    let catalog = config.catalog()?;
    match command {
        Commands::Timesteps => {
            let steps: Vec<_> = catalog.timesteps().map(|t| t.as_ref()).collect();
            println!("{}", serde_json::to_string_pretty(&steps)?);
            return Ok(());
        }
        Commands::Metrics => {
            let metrics: Vec<_> = catalog
                .metrics()
                .map(|m| {
                    serde_json::json!({
                        "name": m.name,
                        "key": m.key,
                        "tags": m.tags,
                        "timesteps": m.timesteps.iter().map(|t| &t.name).collect::<Vec<_>>(),
                        "kind": m.kind,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&metrics)?);
            return Ok(());
        }
        _ => {}
    }

    let client = Client::new(catalog, config.open_store().await?);
    match command {
        Commands::Write { metric, value, tags, at } => {
            let point = MeasurementPoint {
                metric,
                tag_values: tags,
                timestamp: at.unwrap_or_else(Utc::now),
                value,
            };
            client.write(&point).await?;
            println!("{}", serde_json::to_string(&point)?);
        }
        Commands::Graph(query) => {
            let series = client.graph(&query.into_request()).await?;
            println!("{}", serde_json::to_string(&series)?);
        }
        Commands::Sweep { query, by, values } => {
            let series = client
                .graph_each_tag(&query.into_request(), &by, &values)
                .await?;
            println!("{}", serde_json::to_string(&series)?);
        }
        Commands::Timesteps | Commands::Metrics => {}
    }
    Ok(())
}
