//! Metrics and observability utilities
//!
//! Prometheus metric descriptions plus small recording helpers for HTTP
//! requests, backend calls, enrollment outcomes and login lockouts.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all gateway metrics
pub const METRICS_PREFIX: &str = "coursedesk";

/// Histogram buckets for request and backend latency (in seconds).
/// The top bucket sits at the default outbound timeout.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_backend_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Requests sent to the backend, by endpoint and status (0 = transport failure)"
    );

    describe_histogram!(
        format!("{}_backend_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Backend call latency in seconds"
    );

    describe_counter!(
        format!("{}_enrollments_total", METRICS_PREFIX),
        Unit::Count,
        "Enrollment attempts by outcome"
    );

    describe_histogram!(
        format!("{}_enrollment_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end enrollment reconciliation latency"
    );

    describe_counter!(
        format!("{}_login_attempts_total", METRICS_PREFIX),
        Unit::Count,
        "Login attempts by result (accepted, rejected, locked)"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one outbound backend call
pub fn record_backend_call(endpoint: &str, status: u16, duration_secs: f64) {
    counter!(
        format!("{}_backend_requests_total", METRICS_PREFIX),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_backend_duration_seconds", METRICS_PREFIX),
        "endpoint" => endpoint.to_string()
    )
    .record(duration_secs);
}

/// Record the outcome of one enrollment reconciliation
pub fn record_enrollment(outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_enrollments_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_enrollment_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Record a login attempt result
pub fn record_login(result: &str) {
    counter!(
        format!("{}_login_attempts_total", METRICS_PREFIX),
        "result" => result.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
        // Outbound timeout must land in a bucket
        assert!(LATENCY_BUCKETS.contains(&10.0));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: calls are no-ops and must not panic
        let metrics = RequestMetrics::start("POST", "/api/inscripciones");
        metrics.finish(200);
        record_backend_call("list_courses", 200, 0.01);
        record_enrollment("enrolled", 0.02);
        record_login("rejected");
    }
}
