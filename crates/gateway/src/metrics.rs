//! Prometheus metrics.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use codemode_core::{Error, Result};

/// Install the global Prometheus recorder and return its render handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::internal(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

pub fn track_tool_call(origin: &str, success: bool) {
    metrics::counter!(
        "codemode_tool_calls_total",
        "origin" => origin.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
}

pub fn track_execution(success: bool, duration_sec: f64) {
    metrics::counter!("codemode_executions_total", "outcome" => outcome(success)).increment(1);
    metrics::histogram!("codemode_execution_duration_seconds").record(duration_sec);
}

pub fn track_connections(active: usize) {
    metrics::gauge!("codemode_connections_active").set(active as f64);
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}
