pub mod batches;
pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                      create
/// /jobs/{id}                 get
/// /jobs/{id}/cancel          cancel a queued standalone job (POST)
///
/// /batches                   create
/// /batches/preview           preview prompts (POST)
/// /batches/{id}              get, cancel (DELETE)
/// /batches/{id}/jobs         children in creation order
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/batches", batches::router())
}
