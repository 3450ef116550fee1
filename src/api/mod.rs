pub mod search;
pub mod summarize;
pub mod trial;

use axum::response::Html;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// All routes, with the page served at `/` and as the fallback.
///
/// No CORS layer: the page is served from the same origin.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Serve frontend
        .route("/", get(serve_index))
        // API routes
        .route("/api/health", get(trial::health))
        .route("/api/search", post(search::search))
        .route("/api/summarize", post(summarize::summarize))
        .route("/api/summarize/batch", post(summarize::summarize_batch))
        .route("/api/trial/{user_id}", get(trial::trial_status))
        .with_state(state)
        .fallback(get(serve_index))
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}
