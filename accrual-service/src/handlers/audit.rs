use crate::dtos::AuditScanParams;
use crate::models::AccrualPeriod;
use crate::services::BulkAuditor;
use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

/// System-wide scan for tenancies with unreversed incorrect accruals.
/// Read-only; the report is advisory and safe to re-run at any time.
pub async fn scan_accruals(
    State(state): State<AppState>,
    Query(params): Query<AuditScanParams>,
) -> Result<impl IntoResponse, AppError> {
    let target = match (params.month, params.year) {
        (Some(month), Some(year)) => Some(
            AccrualPeriod::new(year, month)
                .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?,
        ),
        (None, None) => None,
        _ => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "month and year must be provided together"
            )))
        }
    };

    let auditor = BulkAuditor::new(state.db.clone(), state.config.audit.verbose_log_cap);
    let report = auditor.scan(target).await?;
    Ok(Json(report))
}
