//! Metrics implementation using Prometheus.

use codemode_core::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::config(format!("Failed to install Prometheus recorder: {}", e)))?;

    describe_metrics();
    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// A handle whose recorder is not installed globally. Renders an empty registry.
pub fn detached_metrics_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

fn describe_metrics() {
    metrics::describe_counter!(
        "codemode_executions_total",
        "Finished executions by language and outcome"
    );
    metrics::describe_histogram!(
        "codemode_execution_duration_seconds",
        metrics::Unit::Seconds,
        "Wall-clock time of executions"
    );
    metrics::describe_counter!(
        "codemode_pool_replacements_total",
        "Sandboxes created to replace lost or compromised ones"
    );
    metrics::describe_counter!(
        "codemode_pool_acquire_timeouts_total",
        "Acquisitions that gave up waiting for an idle sandbox"
    );
    metrics::describe_gauge!("codemode_pool_handles", "Pooled sandboxes by state");
    metrics::describe_counter!(
        "codemode_remote_dispatch_total",
        "Remote commands by outcome"
    );
    metrics::describe_counter!("http_requests_total", "HTTP requests by method, path and status");
}

/// Helper to track HTTP request metrics (latency, count).
pub fn track_request(method: &str, path: &str, status: u16, latency_sec: f64) {
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(latency_sec);
}

