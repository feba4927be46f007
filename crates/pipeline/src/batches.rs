//! Batch job operations and prompt preview.

use mayagen_core::error::CoreError;
use mayagen_core::generation::{validate_total_images, GenerationSettings};
use mayagen_core::naming::sanitize_category;
use mayagen_core::prompt::{PromptExpander, Variations, MAX_PREVIEW_COUNT};
use mayagen_core::types::DbId;
use mayagen_db::models::batch_job::{BatchJob, BatchTermination, NewBatchJob};
use mayagen_db::models::job::Job;
use mayagen_db::QueueStore;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Name given to batches created without one.
pub const DEFAULT_BATCH_NAME: &str = "Untitled Batch";

/// Sample size for previews when the caller does not ask for one.
pub const DEFAULT_PREVIEW_COUNT: usize = 5;

/// Request to generate many images from one subject and its variations.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBatch {
    pub name: Option<String>,
    #[serde(default)]
    pub category: String,
    pub target_subject: String,
    pub total_images: i32,
    #[serde(default)]
    pub variations: Variations,
    pub base_prompt_template: Option<String>,
    /// Walk combinations without repeats (default) or sample them.
    #[serde(default = "default_unique")]
    pub unique_prompts: bool,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

fn default_unique() -> bool {
    true
}

impl CreateBatch {
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

/// Request to preview the prompts a batch would start with.
#[derive(Debug, Clone, Deserialize)]
pub struct PreviewRequest {
    pub target_subject: String,
    #[serde(default)]
    pub variations: Variations,
    pub base_prompt_template: Option<String>,
    pub count: Option<usize>,
}

/// Sample prompts plus the size of the combination space.
#[derive(Debug, Clone, Serialize)]
pub struct PromptPreview {
    pub prompts: Vec<String>,
    pub max_unique_combinations: u64,
}

/// A freshly queued batch and the size of its combination space.
#[derive(Debug, Clone)]
pub struct CreatedBatch {
    pub batch: BatchJob,
    pub max_unique_combinations: u64,
}

/// Validate and enqueue a batch. Expansion happens later on the worker.
///
/// The variations are compiled once here so that a bad template or
/// axis name is rejected up front instead of failing the batch.
pub async fn create_batch(
    store: &dyn QueueStore,
    input: &CreateBatch,
    user_id: Option<DbId>,
) -> Result<CreatedBatch, PipelineError> {
    validate_total_images(input.total_images)?;
    let settings = input.settings();
    settings.validate()?;

    let template = non_blank(input.base_prompt_template.as_deref());
    let expander = PromptExpander::new(&input.target_subject, &input.variations, template)?;

    let name = non_blank(input.name.as_deref()).unwrap_or(DEFAULT_BATCH_NAME);
    let new_batch = NewBatchJob {
        user_id,
        name: name.to_string(),
        category: sanitize_category(&input.category),
        target_subject: input.target_subject.trim().to_string(),
        variations: input.variations.clone(),
        base_prompt_template: template.map(str::to_string),
        unique_prompts: input.unique_prompts,
        total_images: input.total_images,
        model: settings.model,
        provider: settings.provider,
        width: settings.width,
        height: settings.height,
    };
    let batch = store.insert_batch(&new_batch).await?;
    let max_unique_combinations = expander.max_unique_combinations();

    tracing::info!(
        batch_id = batch.id,
        total_images = batch.total_images,
        max_unique_combinations,
        unique_prompts = batch.unique_prompts,
        "Batch queued",
    );
    Ok(CreatedBatch {
        batch,
        max_unique_combinations,
    })
}

/// Every batch, newest first.
pub async fn list_batches(store: &dyn QueueStore) -> Result<Vec<BatchJob>, PipelineError> {
    Ok(store.list_batches().await?)
}

/// Fetch a batch or fail with `NotFound`.
pub async fn get_batch(store: &dyn QueueStore, id: DbId) -> Result<BatchJob, PipelineError> {
    store
        .find_batch(id)
        .await?
        .ok_or(PipelineError::Core(CoreError::NotFound {
            entity: "BatchJob",
            id,
        }))
}

/// Children of a batch in creation order.
pub async fn list_batch_jobs(store: &dyn QueueStore, id: DbId) -> Result<Vec<Job>, PipelineError> {
    get_batch(store, id).await?;
    Ok(store.list_batch_jobs(id).await?)
}

/// Cancel a queued or generating batch together with its queued children.
///
/// Children already claimed run to completion; they no longer count
/// toward the cancelled batch.
pub async fn cancel_batch(
    store: &dyn QueueStore,
    id: DbId,
) -> Result<BatchTermination, PipelineError> {
    let batch = get_batch(store, id).await?;
    let cancelled = store.cancel_batch(id).await?.ok_or_else(|| {
        let status = batch.status().map_or("unknown", |s| s.label());
        CoreError::Conflict(format!("Batch {id} is {status} and cannot be cancelled"))
    })?;

    tracing::info!(
        batch_id = id,
        cancelled_jobs = cancelled.cancelled_jobs,
        "Batch cancelled",
    );
    Ok(cancelled)
}

/// The first prompts a unique batch with these inputs would generate.
pub fn preview_prompts(input: &PreviewRequest) -> Result<PromptPreview, PipelineError> {
    let count = input.count.unwrap_or(DEFAULT_PREVIEW_COUNT);
    if !(1..=MAX_PREVIEW_COUNT).contains(&count) {
        return Err(CoreError::Validation(format!(
            "Preview count must be between 1 and {MAX_PREVIEW_COUNT} (got {count})"
        ))
        .into());
    }
    let template = non_blank(input.base_prompt_template.as_deref());
    let prompts = mayagen_core::prompt::preview_prompts(
        &input.target_subject,
        &input.variations,
        template,
        count,
    )?;
    let max_unique_combinations = mayagen_core::prompt::estimate_unique_combinations(
        &input.target_subject,
        &input.variations,
        template,
    )?;
    Ok(PromptPreview {
        prompts,
        max_unique_combinations,
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
