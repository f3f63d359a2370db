//! Prometheus metrics for accrual-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "accrual_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for correction runs.
pub static CORRECTION_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "accrual_correction_operations_total",
        "Total number of correction operations",
        &["operation", "status"]
    )
    .expect("Failed to register CORRECTION_OPERATIONS")
});

/// Counter for reversal outcomes.
pub static REVERSALS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "accrual_reversals_total",
        "Total number of reversal outcomes",
        &["outcome"]
    )
    .expect("Failed to register REVERSALS")
});

/// Counter for ledger entries dropped because their accrual month could not
/// be resolved.
pub static MALFORMED_ACCRUALS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "accrual_malformed_entries_total",
        "Ledger entries excluded for unparseable accrual metadata",
        &["context"]
    )
    .expect("Failed to register MALFORMED_ACCRUALS")
});

/// Counter for bulk audit scans.
pub static AUDIT_SCANS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "accrual_audit_scans_total",
        "Total number of bulk audit scans",
        &["status"]
    )
    .expect("Failed to register AUDIT_SCANS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&CORRECTION_OPERATIONS);
    Lazy::force(&REVERSALS);
    Lazy::force(&MALFORMED_ACCRUALS);
    Lazy::force(&AUDIT_SCANS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record a correction operation outcome.
pub fn record_correction(operation: &str, status: &str) {
    CORRECTION_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// Record a reversal outcome (created, skipped, error).
pub fn record_reversal(outcome: &str) {
    REVERSALS.with_label_values(&[outcome]).inc();
}

/// Record an entry dropped for malformed accrual metadata.
pub fn record_malformed_accrual(context: &str) {
    MALFORMED_ACCRUALS.with_label_values(&[context]).inc();
}
