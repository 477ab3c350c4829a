//! Prometheus metrics for revenue-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Invoice counter by payment status at creation/settlement.
pub static INVOICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "revenue_invoices_total",
        "Total number of invoices by payment status",
        &["status"] // PENDING, PARTIAL, PAID
    )
    .expect("Failed to register invoices_total")
});

/// Payment attempt counter by status.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "revenue_payments_total",
        "Total number of payment attempts by status",
        &["status"]
    )
    .expect("Failed to register payments_total")
});

/// Gateway sync attempts by result.
pub static GATEWAY_SYNCS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "revenue_gateway_syncs_total",
        "Invoice gateway sync attempts by result",
        &["result"] // synced, empty, failed
    )
    .expect("Failed to register gateway_syncs_total")
});

/// Reconciliation runs by outcome.
pub static RECONCILIATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "revenue_reconciliations_total",
        "Payment reconciliation runs by outcome",
        &["outcome"] // settled, failed, pending, already_settled, already_failed
    )
    .expect("Failed to register reconciliations_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "revenue_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&INVOICES_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&GATEWAY_SYNCS_TOTAL);
    Lazy::force(&RECONCILIATIONS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
