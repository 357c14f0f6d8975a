use crate::models::EntityKind;
use anyhow::{Context, Result};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::path::Path;
use std::time::Duration;

/// Metric name prefix for all ETL metrics
const PREFIX: &str = "music_etl";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Extraction Metrics
    pub static ref FETCHES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_fetches_total"), "Work item fetches by final outcome"),
        &["source", "outcome"]
    ).expect("Failed to create fetches_total metric");

    pub static ref FETCH_RETRIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_fetch_retries_total"), "Retried fetch attempts"),
        &["source"]
    ).expect("Failed to create fetch_retries_total metric");

    // Load Metrics
    pub static ref ROWS_LOADED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_rows_loaded_total"), "Rows inserted or updated"),
        &["kind"]
    ).expect("Failed to create rows_loaded_total metric");

    // Pipeline Metrics
    pub static ref PIPELINE_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_pipeline_runs_total"), "Pipeline runs by status"),
        &["pipeline", "status"]
    ).expect("Failed to create pipeline_runs_total metric");

    pub static ref PIPELINE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_pipeline_duration_seconds"),
            "Pipeline run duration in seconds"
        )
        .buckets(vec![1.0, 10.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]),
        &["pipeline"]
    ).expect("Failed to create pipeline_duration_seconds metric");

    pub static ref PIPELINE_LAST_SUCCESS_TIMESTAMP: GaugeVec = GaugeVec::new(
        Opts::new(
            format!("{PREFIX}_pipeline_last_success_timestamp_seconds"),
            "Unix time of the last successful run"
        ),
        &["pipeline"]
    ).expect("Failed to create pipeline_last_success_timestamp metric");
}

pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(FETCHES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(FETCH_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ROWS_LOADED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PIPELINE_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PIPELINE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PIPELINE_LAST_SUCCESS_TIMESTAMP.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_fetch(source: &str, outcome: &str) {
    FETCHES_TOTAL.with_label_values(&[source, outcome]).inc();
}

pub fn record_retry(source: &str) {
    FETCH_RETRIES_TOTAL.with_label_values(&[source]).inc();
}

pub fn record_rows_loaded(kind: EntityKind, rows: usize) {
    ROWS_LOADED_TOTAL
        .with_label_values(&[kind.as_str()])
        .inc_by(rows as f64);
}

pub fn record_pipeline_run(pipeline: &str, succeeded: bool, duration: Duration) {
    let status = if succeeded { "success" } else { "failure" };
    PIPELINE_RUNS_TOTAL
        .with_label_values(&[pipeline, status])
        .inc();
    PIPELINE_DURATION_SECONDS
        .with_label_values(&[pipeline])
        .observe(duration.as_secs_f64());
    if succeeded {
        PIPELINE_LAST_SUCCESS_TIMESTAMP
            .with_label_values(&[pipeline])
            .set(chrono::Utc::now().timestamp() as f64);
    }
}

/// Renders the registry in Prometheus text exposition format.
pub fn render() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}

/// Writes the current metrics to `path`, for a node-exporter textfile collector.
pub fn write_text_file(path: &Path) -> Result<()> {
    let rendered = render()?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, rendered)
        .with_context(|| format!("Failed to write metrics to {:?}", tmp))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move metrics file into place at {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn registered_metrics_are_rendered() {
        init_metrics();
        record_fetch("charts", "found");
        record_rows_loaded(EntityKind::ChartEntry, 3);
        record_pipeline_run("charts", true, Duration::from_secs(2));

        let text = render().unwrap();
        assert!(text.contains("music_etl_fetches_total"));
        assert!(text.contains("kind=\"chart_entry\""));
        assert!(text.contains("music_etl_pipeline_duration_seconds"));
    }

    #[test]
    fn text_file_export() {
        init_metrics();
        record_retry("stats");
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etl.prom");
        write_text_file(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("music_etl_fetch_retries_total"));
    }
}
