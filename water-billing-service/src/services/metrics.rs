//! Prometheus metrics for water-billing-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// HTTP request counter by route and status.
pub static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "water_billing_http_requests_total",
        "Total number of HTTP requests",
        &["method", "route", "status"]
    )
    .expect("Failed to register http_requests_total")
});

/// HTTP request duration histogram by route.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "water_billing_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "route"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register http_request_duration")
});

/// Invoices issued, by origin (single, billing_run).
pub static INVOICES_GENERATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "water_billing_invoices_generated_total",
        "Total number of invoices generated",
        &["origin"]
    )
    .expect("Failed to register invoices_generated")
});

/// Payments by method and outcome.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "water_billing_payments_total",
        "Total number of payment applications",
        &["method", "status"]
    )
    .expect("Failed to register payments_total")
});

/// Voids by entity (invoice, payment).
pub static VOIDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "water_billing_voids_total",
        "Total number of voided invoices and payments",
        &["entity"]
    )
    .expect("Failed to register voids_total")
});

pub static OVERDUE_TRANSITIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "water_billing_overdue_transitions_total",
        "Total number of invoices moved to overdue",
        &["trigger"]
    )
    .expect("Failed to register overdue_transitions")
});

pub static USAGE_ANOMALIES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "water_billing_usage_anomalies_total",
        "Total number of readings flagged as anomalous",
        &["rule"]
    )
    .expect("Failed to register usage_anomalies")
});

/// Rate resolution cache lookups (hit, miss).
pub static RATE_CACHE_LOOKUPS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "water_billing_rate_cache_lookups_total",
        "Rate resolution cache lookups",
        &["result"]
    )
    .expect("Failed to register rate_cache_lookups")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "water_billing_errors_total",
        "Total number of errors by kind",
        &["operation", "kind"]
    )
    .expect("Failed to register errors_total")
});

/// Storage operation duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "water_billing_db_query_duration_seconds",
        "Storage operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&INVOICES_GENERATED);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&VOIDS_TOTAL);
    Lazy::force(&OVERDUE_TRANSITIONS);
    Lazy::force(&USAGE_ANOMALIES);
    Lazy::force(&RATE_CACHE_LOOKUPS);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Record a failed core operation.
pub fn record_error(operation: &str, err: &crate::error::BillingError) {
    ERRORS_TOTAL
        .with_label_values(&[operation, err.kind().as_str()])
        .inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
