//! Standalone job operations.

use mayagen_core::error::CoreError;
use mayagen_core::generation::{validate_prompt, GenerationSettings};
use mayagen_core::naming::{job_filename, sanitize_category, sanitize_prefix};
use mayagen_core::types::DbId;
use mayagen_db::models::job::{Job, NewJob};
use mayagen_db::models::status::JobStatus;
use mayagen_db::QueueStore;
use serde::Deserialize;

use crate::error::PipelineError;

/// Request to render a single image.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJob {
    pub prompt: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub model: Option<String>,
    pub provider: Option<String>,
    #[serde(default)]
    pub category: String,
    pub filename_prefix: Option<String>,
}

impl CreateJob {
    fn settings(&self) -> GenerationSettings {
        let defaults = GenerationSettings::default();
        GenerationSettings {
            model: self.model.clone().unwrap_or(defaults.model),
            provider: self.provider.clone().unwrap_or(defaults.provider),
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
        }
    }
}

/// Validate and enqueue a standalone job.
pub async fn create_job(
    store: &dyn QueueStore,
    input: &CreateJob,
    user_id: Option<DbId>,
) -> Result<Job, PipelineError> {
    validate_prompt(&input.prompt)?;
    let settings = input.settings();
    settings.validate()?;

    let prefix = sanitize_prefix(input.filename_prefix.as_deref());
    let new_job = NewJob {
        user_id,
        prompt: input.prompt.trim().to_string(),
        width: settings.width,
        height: settings.height,
        model: settings.model,
        provider: settings.provider,
        category: sanitize_category(&input.category),
        filename: job_filename(&prefix),
    };
    let job = store.insert_job(&new_job).await?;

    tracing::info!(
        job_id = job.id,
        model = %job.model,
        provider = %job.provider,
        category = %job.category,
        "Job queued",
    );
    Ok(job)
}

/// Fetch a job or fail with `NotFound`.
pub async fn get_job(store: &dyn QueueStore, id: DbId) -> Result<Job, PipelineError> {
    store
        .find_job(id)
        .await?
        .ok_or(PipelineError::Core(CoreError::NotFound { entity: "Job", id }))
}

/// Cancel a queued standalone job.
///
/// Batch children must be cancelled through their batch. Jobs that have
/// already been claimed or finished cannot be cancelled.
pub async fn cancel_job(store: &dyn QueueStore, id: DbId) -> Result<Job, PipelineError> {
    let job = get_job(store, id).await?;
    if let Some(batch_id) = job.batch_job_id {
        return Err(CoreError::Conflict(format!(
            "Job {id} belongs to batch {batch_id}; cancel the batch instead"
        ))
        .into());
    }

    match store.cancel_job(id).await? {
        Some(job) => {
            tracing::info!(job_id = id, "Job cancelled");
            Ok(job)
        }
        None => {
            let status = store
                .find_job(id)
                .await?
                .and_then(|j| j.status())
                .map_or("unknown", JobStatus::label);
            Err(CoreError::Conflict(format!("Job {id} is {status} and cannot be cancelled")).into())
        }
    }
}
