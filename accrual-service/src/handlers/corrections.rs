use crate::dtos::CorrectionRequest;
use crate::services::CorrectionEngine;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

/// Correct one tenancy to its actual end date. Expected conditions
/// ("nothing to correct", "already reversed") come back as success
/// outcomes; only a missing tenancy or an infrastructure failure is an
/// error response.
pub async fn correct_tenancy(
    State(state): State<AppState>,
    Path(tenancy_id): Path<String>,
    Json(request): Json<CorrectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.reason.trim().is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "A correction reason is required"
        )));
    }

    let actor = request
        .corrected_by
        .as_deref()
        .unwrap_or("system")
        .to_string();

    let engine = CorrectionEngine::new(state.db.clone());
    let outcome = engine
        .correct_tenancy(
            &tenancy_id,
            request.actual_end_date,
            request.reason.trim(),
            &actor,
        )
        .await?;

    Ok(Json(outcome))
}
