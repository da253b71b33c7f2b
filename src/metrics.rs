/// Metrics and telemetry for the Toolshub gateway
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Account registrations and verifications
/// - Quota grants and rejections
/// - Metered calls by endpoint

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Account Metrics ==========

    /// Account registrations
    pub static ref REGISTRATIONS_TOTAL: IntCounter = register_int_counter!(
        "registrations_total",
        "Total number of account registrations"
    )
    .unwrap();

    /// Completed account verifications
    pub static ref VERIFICATIONS_TOTAL: IntCounter = register_int_counter!(
        "verifications_total",
        "Total number of completed account verifications"
    )
    .unwrap();

    // ========== Quota Metrics ==========

    /// Metered calls admitted by the quota guard
    pub static ref QUOTA_GRANTS_TOTAL: IntCounter = register_int_counter!(
        "quota_grants_total",
        "Total number of metered calls admitted"
    )
    .unwrap();

    /// Metered calls rejected for exhausted quota
    pub static ref QUOTA_REJECTIONS_TOTAL: IntCounter = register_int_counter!(
        "quota_rejections_total",
        "Total number of metered calls rejected over quota"
    )
    .unwrap();

    /// Persisted metered calls by endpoint
    pub static ref METERED_CALLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "metered_calls_total",
        "Total number of metered calls persisted to the usage ledger",
        &["endpoint"]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record an account registration
pub fn record_registration() {
    REGISTRATIONS_TOTAL.inc();
}

/// Record a completed verification
pub fn record_verification() {
    VERIFICATIONS_TOTAL.inc();
}

/// Record an admitted metered call
pub fn record_quota_grant() {
    QUOTA_GRANTS_TOTAL.inc();
}

/// Record a metered call rejected over quota
pub fn record_quota_rejection() {
    QUOTA_REJECTIONS_TOTAL.inc();
}

/// Record a metered call persisted to the usage ledger
pub fn record_metered_call(endpoint: &str) {
    METERED_CALLS_TOTAL.with_label_values(&[endpoint]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/api/health", 200, 0.05);
        let metrics = render_metrics();
        assert!(metrics.contains("http_requests_total"));
        assert!(metrics.contains("http_request_duration_seconds"));
    }

    #[test]
    fn test_record_account_events() {
        record_registration();
        record_verification();
        let metrics = render_metrics();
        assert!(metrics.contains("registrations_total"));
        assert!(metrics.contains("verifications_total"));
    }

    #[test]
    fn test_record_quota_events() {
        record_quota_grant();
        record_quota_rejection();
        record_metered_call("/api/tools/test");
        let metrics = render_metrics();
        assert!(metrics.contains("quota_grants_total"));
        assert!(metrics.contains("quota_rejections_total"));
        assert!(metrics.contains("metered_calls_total"));
    }
}
