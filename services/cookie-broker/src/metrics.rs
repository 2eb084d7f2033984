//! Prometheus metrics exposition
//!
//! The library crates emit through the `metrics` macros; this module installs
//! the recorder and owns the metrics recorded at the HTTP boundary:
//!
//! - `webhook_requests_total` (counter): labels `endpoint`, `status`
//! - `dispatch_duration_seconds` (histogram): label `category`
//! - `dispatch_errors_total` (counter): labels `category`, `error_type`
//!
//! Pool metrics (`leases_acquired_total`, `credentials_banned_total`,
//! `pool_credentials`, `lease_wait_seconds`, `scheduler_*`) come from
//! `lease-pool`.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Buckets for the outbound hand-off, which is bounded by the read timeout.
const DISPATCH_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 10.0];

/// Buckets for time spent waiting on a credential, in retry-interval steps.
const LEASE_WAIT_BUCKETS: &[f64] = &[
    0.001, 0.01, 0.1, 1.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0, 14400.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("dispatch_duration_seconds".to_string()),
            DISPATCH_BUCKETS,
        )
        .and_then(|b| {
            b.set_buckets_for_metric(
                Matcher::Full("lease_wait_seconds".to_string()),
                LEASE_WAIT_BUCKETS,
            )
        })
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(builder()?.install_recorder()?)
}

/// Record a handled webhook request.
pub fn record_request(endpoint: &'static str, status: u16) {
    metrics::counter!(
        "webhook_requests_total",
        "endpoint" => endpoint,
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed hand-off to the processor.
pub fn record_dispatch(category: &str, duration_secs: f64) {
    metrics::histogram!("dispatch_duration_seconds", "category" => category.to_string())
        .record(duration_secs);
}

/// Record a failed hand-off with a classification label.
pub fn record_dispatch_error(category: &str, error_type: &'static str) {
    metrics::counter!(
        "dispatch_errors_total",
        "category" => category.to_string(),
        "error_type" => error_type
    )
    .increment(1);
}
