//! Transport metrics
//!
//! Recorded through the `metrics` facade; the embedding process installs
//! the exporter. Without a recorder every call is a no-op.
//!
//! - `bc_transport_requests_total` (counter): labels `outcome`, `method`
//! - `bc_transport_request_duration_seconds` (histogram): label `outcome`
//! - `bc_transport_retries_total` (counter): label `method`
//! - `bc_transport_errors_total` (counter): label `error_type`
//! - `bc_transport_cache_total` (counter): label `result`
//!
//! The histogram has no buckets of its own. Embedders exporting to
//! Prometheus register [`DURATION_BUCKETS`] for [`REQUEST_DURATION_SECONDS`]
//! on their builder:
//!
//! ```
//! use bc_transport::metrics::{DURATION_BUCKETS, REQUEST_DURATION_SECONDS};
//! use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
//!
//! let recorder = PrometheusBuilder::new()
//!     .set_buckets_for_metric(
//!         Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
//!         DURATION_BUCKETS,
//!     )
//!     .unwrap()
//!     .build_recorder();
//! # drop(recorder);
//! ```

/// Histogram name, for configuring exporter buckets.
pub const REQUEST_DURATION_SECONDS: &str = "bc_transport_request_duration_seconds";

/// Bucket boundaries from 5ms to 60s, covering the timeout range.
pub const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Record a finished dispatch (after retries).
pub fn record_request(outcome: &str, method: &str, duration_secs: f64) {
    metrics::counter!("bc_transport_requests_total", "outcome" => outcome.to_string(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "outcome" => outcome.to_string())
        .record(duration_secs);
}

pub fn record_retry(method: &str) {
    metrics::counter!("bc_transport_retries_total", "method" => method.to_string()).increment(1);
}

pub fn record_error(error_type: &str) {
    metrics::counter!("bc_transport_errors_total", "error_type" => error_type.to_string())
        .increment(1);
}

/// `hit` or `miss`.
pub fn record_cache(result: &str) {
    metrics::counter!("bc_transport_cache_total", "result" => result.to_string()).increment(1);
}
