use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::models::{SearchRequest, SearchResponse};
use crate::state::AppState;

const MAX_SEARCH_LIMIT: usize = 50;

/// POST /api/search - BM25 verse search. Each hit carries the verse and its
/// commentaries so the page can request summaries without another lookup.
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }
    let limit = req.limit.clamp(1, MAX_SEARCH_LIMIT);

    let retriever = state.retriever.clone();
    let q = query.clone();
    let results = tokio::task::spawn_blocking(move || retriever.search(&q, limit))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Search error: {e}"),
            )
        })?
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Search error: {e}"),
            )
        })?;

    tracing::info!("Search {query:?}: {} verses", results.len());

    Ok(Json(SearchResponse { query, results }))
}
