use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::models::{HealthResponse, TrialResponse};
use crate::state::AppState;

/// GET /api/trial/{user_id} - Free-trial standing for a user.
pub async fn trial_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<TrialResponse>, (StatusCode, String)> {
    let meter = state.synthesizer.meter();
    let remaining = meter.remaining(&user_id).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Usage store error: {e}"),
        )
    })?;

    Ok(Json(TrialResponse {
        user_id,
        remaining,
        can_use: remaining > 0,
        limit: meter.limit(),
    }))
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        verses: state.corpus.verses().len(),
        commentaries: state.corpus.commentary_count(),
        schools: state.corpus.schools().len(),
        trial_available: state.synthesizer.has_trial_credential(),
    })
}
