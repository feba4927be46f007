use axum::routing::{get, post};
use axum::Router;

use crate::handlers::batches;
use crate::state::AppState;

/// Routes mounted at `/batches`.
///
/// ```text
/// GET    /                -> list_batches
/// POST   /                -> create_batch
/// GET    /presets         -> variation_presets
/// POST   /preview         -> preview_prompts
/// GET    /{id}            -> get_batch
/// DELETE /{id}            -> cancel_batch
/// GET    /{id}/jobs       -> list_batch_jobs
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(batches::list_batches).post(batches::create_batch))
        .route("/presets", get(batches::variation_presets))
        .route("/preview", post(batches::preview_prompts))
        .route(
            "/{id}",
            get(batches::get_batch).delete(batches::cancel_batch),
        )
        .route("/{id}/jobs", get(batches::list_batch_jobs))
}
