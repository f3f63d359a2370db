use chrono::NaiveDate;
use serde::Deserialize;

/// Body of a single-tenancy correction request.
#[derive(Debug, Clone, Deserialize)]
pub struct CorrectionRequest {
    /// The lease's actual end date.
    pub actual_end_date: NaiveDate,
    /// Human-readable reason recorded on every reversal and audit record.
    pub reason: String,
    /// Who asked for the correction. Defaults to "system" for
    /// scheduler-triggered runs.
    pub corrected_by: Option<String>,
}

/// Query parameters of a bulk audit scan. Month and year come together or
/// not at all; omitted means "now".
#[derive(Debug, Clone, Deserialize)]
pub struct AuditScanParams {
    pub month: Option<u32>,
    pub year: Option<i32>,
}
