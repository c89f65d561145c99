//! Refresh metrics
//!
//! - `bc_token_refresh_total` (counter): label `outcome`
//!   (`success`, `failure`, `exhausted`)

pub fn record_refresh(outcome: &str) {
    metrics::counter!("bc_token_refresh_total", "outcome" => outcome.to_string()).increment(1);
}
