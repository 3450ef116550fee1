use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::models::{
    BatchSummarizeRequest, BatchSummarizeResponse, SummarizeRequest, SummarizeResponse,
    UsageContext,
};
use crate::state::AppState;
use crate::synthesis::orchestrator::VerseJob;

/// Upper bound on verses per batch request.
const MAX_BATCH_VERSES: usize = 50;

/// POST /api/summarize - Synthesize the commentaries of one verse.
///
/// Always answers 200 with an outcome once the verse is known: request
/// failures surface as `skipped`, trial refusals as `blocked`.
pub async fn summarize(
    State(state): State<AppState>,
    Json(req): Json<SummarizeRequest>,
) -> Result<Json<SummarizeResponse>, (StatusCode, String)> {
    // ── Step 1: Validate ──────────────────────────────────
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }
    if state.corpus.verse(&req.verse_id).is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            format!("Verse not found: {}", req.verse_id),
        ));
    }
    let usage = usage_context(req.user_id, req.api_key);

    // ── Step 2: Acquire semaphore ─────────────────────────
    let _permit = state
        .synth_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Synthesis service at capacity".to_string(),
            )
        })?;

    // ── Step 3: Synthesize ────────────────────────────────
    let outcome = state
        .synthesizer
        .summarize_verse(
            &req.verse_id,
            state.corpus.commentaries(&req.verse_id),
            &query,
            &usage,
        )
        .await;

    Ok(Json(SummarizeResponse {
        verse_id: req.verse_id,
        user_id: usage.user_id,
        outcome,
    }))
}

/// POST /api/summarize/batch - Synthesize several verses for one query.
/// Unknown verse ids come back as `skipped` in their slot.
pub async fn summarize_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchSummarizeRequest>,
) -> Result<Json<BatchSummarizeResponse>, (StatusCode, String)> {
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }
    if req.verse_ids.len() > MAX_BATCH_VERSES {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("At most {MAX_BATCH_VERSES} verses per batch"),
        ));
    }
    let usage = usage_context(req.user_id, req.api_key);

    let jobs: Vec<VerseJob> = req
        .verse_ids
        .into_iter()
        .map(|verse_id| VerseJob {
            commentaries: state.corpus.commentaries(&verse_id).to_vec(),
            verse_id,
        })
        .collect();

    let _permit = state
        .synth_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Synthesis service at capacity".to_string(),
            )
        })?;

    let outcomes = state
        .synthesizer
        .summarize_batch(&jobs, &query, &usage, state.config.batch_concurrency)
        .await;

    Ok(Json(BatchSummarizeResponse {
        user_id: usage.user_id,
        outcomes,
    }))
}

/// Blank or missing user ids get a fresh one the page keeps for later calls.
fn usage_context(user_id: Option<String>, api_key: Option<String>) -> UsageContext {
    let user_id = user_id
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    UsageContext {
        user_id,
        user_credential: api_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_user_id_is_issued() {
        let a = usage_context(None, None);
        let b = usage_context(Some("  ".into()), None);
        assert!(Uuid::parse_str(&a.user_id).is_ok());
        assert!(Uuid::parse_str(&b.user_id).is_ok());
        assert_ne!(a.user_id, b.user_id);
    }

    #[test]
    fn test_user_id_and_key_pass_through() {
        let usage = usage_context(Some(" reader-1 ".into()), Some("sk-abc".into()));
        assert_eq!(usage.user_id, "reader-1");
        assert_eq!(usage.user_credential.as_deref(), Some("sk-abc"));
    }
}
