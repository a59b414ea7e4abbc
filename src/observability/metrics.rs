//! Metrics collection and exposition.
//!
//! # Metrics
//! - `container_requests_total` (counter): requests by listener, status
//! - `container_request_duration_seconds` (histogram): latency by listener
//! - `container_task_runs_total` (counter): completed periodic task runs
//!
//! # Design Decisions
//! - The `metrics` facade is process-global; the Prometheus recorder is
//!   installed at most once and every container shares its handle
//! - Latency buckets start at the configured maximum and shrink by 5x down
//!   to 10ms, so the histogram stays small

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ObservabilityConfig;

pub const REQUESTS_TOTAL: &str = "container_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "container_request_duration_seconds";
pub const TASK_RUNS_TOTAL: &str = "container_task_runs_total";

const SMALLEST_BUCKET_MS: u64 = 10;
const BUCKET_FACTOR: u64 = 5;

static RECORDER: Mutex<Option<PrometheusHandle>> = parking_lot::const_mutex(None);

/// Histogram bucket bounds in seconds, ascending.
///
/// Starts at `max` and divides by 5 (truncated to whole milliseconds) while
/// the bound stays above 10ms. Empty when `max` is 10ms or less.
pub fn latency_buckets(max: Duration) -> Vec<f64> {
    let mut buckets = Vec::new();
    let mut bound_ms = max.as_millis() as u64;
    while bound_ms > SMALLEST_BUCKET_MS {
        buckets.push(Duration::from_millis(bound_ms).as_secs_f64());
        bound_ms /= BUCKET_FACTOR;
    }
    buckets.reverse();
    buckets
}

/// Install the Prometheus recorder (once per process) and return its handle.
///
/// Returns `None` when metrics are disabled or another recorder already owns
/// the global slot.
pub fn install_recorder(config: &ObservabilityConfig) -> Option<PrometheusHandle> {
    if !config.metrics_enabled {
        return None;
    }

    let mut slot = RECORDER.lock();
    if let Some(handle) = slot.as_ref() {
        return Some(handle.clone());
    }

    let buckets = latency_buckets(Duration::from_millis(config.max_latency_bucket_ms));
    let builder = PrometheusBuilder::new();
    let installed = if buckets.is_empty() {
        builder.install_recorder()
    } else {
        builder
            .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION_SECONDS.to_string()), &buckets)
            .and_then(|builder| builder.install_recorder())
    };

    match installed {
        Ok(handle) => {
            tracing::info!(buckets = buckets.len(), "Prometheus recorder installed");
            *slot = Some(handle.clone());
            Some(handle)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Prometheus recorder, metrics disabled");
            None
        }
    }
}

/// Middleware recording request count and latency for one listener.
pub async fn track_requests(
    State(listener): State<Arc<str>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    let latency = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        REQUESTS_TOTAL,
        "listener" => listener.to_string(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "listener" => listener.to_string())
        .record(latency);

    response
}

/// Count one completed run of a periodic task.
pub fn record_task_run(task: &str) {
    metrics::counter!(TASK_RUNS_TOTAL, "task" => task.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_shrink_by_five_down_to_ten_millis() {
        assert_eq!(
            latency_buckets(Duration::from_secs(10)),
            vec![0.016, 0.08, 0.4, 2.0, 10.0]
        );
    }

    #[test]
    fn buckets_truncate_to_whole_millis() {
        assert_eq!(latency_buckets(Duration::from_millis(999)), vec![0.039, 0.199, 0.999]);
    }

    #[test]
    fn tiny_maximum_yields_no_buckets() {
        assert!(latency_buckets(Duration::from_millis(10)).is_empty());
    }

    #[test]
    fn disabled_metrics_install_nothing() {
        let config = ObservabilityConfig {
            metrics_enabled: false,
            ..ObservabilityConfig::default()
        };
        assert!(install_recorder(&config).is_none());
    }

    #[test]
    fn recorder_is_shared() {
        let config = ObservabilityConfig::default();
        let first = install_recorder(&config);
        let second = install_recorder(&config);
        assert_eq!(first.is_some(), second.is_some());
    }
}
