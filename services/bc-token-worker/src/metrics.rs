//! Prometheus metrics exposition
//!
//! Renders everything recorded through the `metrics` facade, including
//! `bc_token_refresh_total` from the scheduler, plus:
//!
//! - `bc_token_scheduler_healthy` (gauge): 1 while the scheduler is running,
//!   0 once it has given up

use bc_refresh::RefreshState;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Mirror the scheduler state into the health gauge.
pub fn record_scheduler_state(state: &RefreshState) {
    let healthy = if state.is_failed() { 0.0 } else { 1.0 };
    metrics::gauge!("bc_token_scheduler_healthy").set(healthy);
}
