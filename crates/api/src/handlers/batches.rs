//! Handlers for the `/batches` resource.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use mayagen_core::types::DbId;
use mayagen_core::prompt::{default_variations, Variations};
use mayagen_db::models::batch_job::BatchJobWithStatus;
use mayagen_db::models::job::JobWithStatus;
use mayagen_pipeline::batches::{self, CreateBatch, PreviewRequest};
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of a successful batch creation.
#[derive(Debug, Serialize)]
pub struct CreatedBatch {
    #[serde(flatten)]
    pub batch: BatchJobWithStatus,
    /// Distinct prompts the variations can produce; past this the batch
    /// repeats prompts.
    pub max_unique_combinations: u64,
}

/// Body of a successful batch cancellation.
#[derive(Debug, Serialize)]
pub struct CancelledBatch {
    pub batch: BatchJobWithStatus,
    /// Queued children cancelled along with the batch.
    pub cancelled_jobs: u64,
}

/// POST /api/v1/batches
///
/// Queue a batch. Child jobs are created later by a worker. Returns 201.
pub async fn create_batch(
    State(state): State<AppState>,
    payload: Result<Json<CreateBatch>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload?;
    let created = batches::create_batch(state.store.as_ref(), &input, None).await?;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: CreatedBatch {
                batch: created.batch.into(),
                max_unique_combinations: created.max_unique_combinations,
            },
        }),
    ))
}

/// GET /api/v1/batches
///
/// Every batch, newest first.
pub async fn list_batches(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let batches: Vec<BatchJobWithStatus> = batches::list_batches(state.store.as_ref())
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(DataResponse { data: batches }))
}

/// GET /api/v1/batches/presets
///
/// Variation axes clients can start a batch from.
pub async fn variation_presets() -> Json<DataResponse<Variations>> {
    Json(DataResponse {
        data: default_variations(),
    })
}

/// GET /api/v1/batches/{id}
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let batch = batches::get_batch(state.store.as_ref(), batch_id).await?;
    Ok(Json(DataResponse {
        data: BatchJobWithStatus::from(batch),
    }))
}

/// GET /api/v1/batches/{id}/jobs
pub async fn list_batch_jobs(
    State(state): State<AppState>,
    Path(batch_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let jobs: Vec<JobWithStatus> = batches::list_batch_jobs(state.store.as_ref(), batch_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(DataResponse { data: jobs }))
}

/// DELETE /api/v1/batches/{id}
///
/// Cancel a queued or generating batch and its queued children.
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let termination = batches::cancel_batch(state.store.as_ref(), batch_id).await?;
    Ok(Json(DataResponse {
        data: CancelledBatch {
            batch: termination.batch.into(),
            cancelled_jobs: termination.cancelled_jobs,
        },
    }))
}

/// POST /api/v1/batches/preview
///
/// The first prompts a batch with these inputs would produce, without
/// queueing anything.
pub async fn preview_prompts(
    payload: Result<Json<PreviewRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload?;
    let preview = batches::preview_prompts(&input)?;
    Ok(Json(DataResponse { data: preview }))
}
