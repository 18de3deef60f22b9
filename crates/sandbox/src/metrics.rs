//! Pool and execution metrics.
//!
//! Recorded through the `metrics` facade; the binary installs the Prometheus
//! recorder. Without a recorder these calls are no-ops.

use std::time::Duration;

use crate::handle::PoolStats;

/// Count one finished execution and its wall-clock time.
pub fn record_execution(language: &str, outcome: &str, duration: Duration) {
    metrics::counter!(
        "codemode_executions_total",
        "language" => language.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "codemode_execution_duration_seconds",
        "language" => language.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A sandbox was created to replace a lost or compromised one.
pub fn record_replacement() {
    metrics::counter!("codemode_pool_replacements_total").increment(1);
}

/// An acquire gave up waiting for an idle sandbox.
pub fn record_acquire_timeout() {
    metrics::counter!("codemode_pool_acquire_timeouts_total").increment(1);
}

/// Publish the membership snapshot as gauges.
pub fn publish_pool_stats(stats: &PoolStats) {
    metrics::gauge!("codemode_pool_handles", "state" => "idle").set(stats.idle as f64);
    metrics::gauge!("codemode_pool_handles", "state" => "in_use").set(stats.in_use as f64);
    metrics::gauge!("codemode_pool_handles", "state" => "unhealthy").set(stats.unhealthy as f64);
}
