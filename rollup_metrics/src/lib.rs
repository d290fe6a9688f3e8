//! Process-wide prometheus instruments for the rollup engine.
use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, TextEncoder};

pub static MERGES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("rollup_merges_total", "Bucket merges applied")
        .expect("register rollup_merges_total")
});
pub static MERGE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("rollup_merge_failures_total", "Bucket merges that failed")
        .expect("register rollup_merge_failures_total")
});
pub static CAS_CONFLICTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!(
        "rollup_cas_conflicts_total",
        "Optimistic merge commits that lost a race"
    )
    .expect("register rollup_cas_conflicts_total")
});
pub static GRAPH_QUERIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("rollup_graph_queries_total", "Graph queries served")
        .expect("register rollup_graph_queries_total")
});
pub static GRAPH_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("rollup_graph_failures_total", "Graph queries that failed")
        .expect("register rollup_graph_failures_total")
});
pub static GRAPH_LATENCY_SECS: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new("rollup_graph_latency_seconds", "Graph latency in seconds")
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]);
    prometheus::register_histogram!(opts).expect("register rollup_graph_latency_seconds")
});

/// Render every registered metric in the prometheus text format.
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_text_names_touched_metrics() {
        MERGES_TOTAL.inc();
        GRAPH_LATENCY_SECS.observe(0.002);
        let text = render().unwrap();
        assert!(text.contains("rollup_merges_total"));
        assert!(text.contains("rollup_graph_latency_seconds_bucket"));
    }
}
