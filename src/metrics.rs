//! Prometheus metrics for the fan-out coordinator and block builders
//!
//! Metrics live in the default registry so a process embedding the
//! coordinator exposes them alongside its own.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    /// Fan-out operations by outcome
    pub static ref FANOUT_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fanout_requests_total",
        "Total fan-out operations",
        &["operation", "status"]
    ).unwrap();

    /// Backend failures observed during fan-out, by declared behavior
    pub static ref FANOUT_BACKEND_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fanout_backend_errors_total",
        "Total backend failures during fan-out operations",
        &["backend", "behavior", "operation"]
    ).unwrap();

    /// Fan-out operation latency
    pub static ref FANOUT_OPERATION_DURATION: HistogramVec = register_histogram_vec!(
        "fanout_operation_duration_seconds",
        "Fan-out operation latency in seconds",
        &["operation"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Datapoints appended to blocks
    pub static ref BLOCK_DATAPOINTS: IntCounterVec = register_int_counter_vec!(
        "block_datapoints_total",
        "Total datapoints appended to query blocks",
        &["type"]
    ).unwrap();
}

/// Touch every metric so it shows up before first use
pub fn init() {
    lazy_static::initialize(&FANOUT_REQUESTS_TOTAL);
    lazy_static::initialize(&FANOUT_BACKEND_ERRORS_TOTAL);
    lazy_static::initialize(&FANOUT_OPERATION_DURATION);
    lazy_static::initialize(&BLOCK_DATAPOINTS);

    tracing::info!("Metrics system initialized");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a completed fan-out operation
#[inline]
pub fn record_operation(operation: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    FANOUT_REQUESTS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    FANOUT_OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Record a backend failure
#[inline]
pub fn record_backend_error(backend: &str, behavior: &str, operation: &str) {
    FANOUT_BACKEND_ERRORS_TOTAL
        .with_label_values(&[backend, behavior, operation])
        .inc();
}
