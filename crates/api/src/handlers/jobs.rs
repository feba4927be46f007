//! Handlers for the `/jobs` resource.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use mayagen_core::types::DbId;
use mayagen_db::models::job::JobWithStatus;
use mayagen_pipeline::jobs::{self, CreateJob};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/jobs
///
/// Queue a single image. Returns 201 with the created job.
pub async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<CreateJob>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload?;
    let job = jobs::create_job(state.store.as_ref(), &input, None).await?;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: JobWithStatus::from(job),
        }),
    ))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = jobs::get_job(state.store.as_ref(), job_id).await?;
    Ok(Json(DataResponse {
        data: JobWithStatus::from(job),
    }))
}

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancel a queued standalone job. Batch children and jobs that already
/// left the queue answer 409.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = jobs::cancel_job(state.store.as_ref(), job_id).await?;
    Ok(Json(DataResponse {
        data: JobWithStatus::from(job),
    }))
}
