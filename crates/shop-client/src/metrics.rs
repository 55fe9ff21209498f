//! Pipeline metrics
//!
//! - `api_requests_total` (counter): labels `method`, `outcome`
//! - `api_request_duration_seconds` (histogram): label `outcome`
//! - `api_requests_in_flight` (gauge)
//! - `api_session_renewals_total` (counter): label `result`
//!
//! `outcome` is `success` or the error kind (`network`, `auth`, `api`,
//! `validation`). With no recorder installed these calls are no-ops.

/// Histogram buckets for `api_request_duration_seconds`, spanning 5ms up to
/// the default request timeout.
pub const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Record one completed `execute` call.
pub fn record_request(method: &str, outcome: &'static str, duration_secs: f64) {
    metrics::counter!("api_requests_total", "method" => method.to_string(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!("api_request_duration_seconds", "outcome" => outcome).record(duration_secs);
}

/// Publish the current in-flight count.
pub fn set_in_flight(count: usize) {
    metrics::gauge!("api_requests_in_flight").set(count as f64);
}

/// Record one renewal network call and how it ended.
pub fn record_renewal(result: &'static str) {
    metrics::counter!("api_session_renewals_total", "result" => result).increment(1);
}
