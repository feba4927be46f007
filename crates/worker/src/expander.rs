//! Batch expansion: turning one queued batch into its child jobs.
//!
//! Claiming the batch (queued -> generating) is the exactly-once guard; a
//! batch is never handed out for expansion twice. Children are inserted in
//! chunks, each chunk re-checking that the batch is still generating so a
//! batch cancelled mid-expansion stops growing.

use std::sync::Arc;

use mayagen_core::naming::batch_child_filename;
use mayagen_core::prompt::{PromptExpander, SamplingMode};
use mayagen_core::types::DbId;
use mayagen_db::models::batch_job::BatchJob;
use mayagen_db::models::job::NewBatchChild;
use mayagen_db::{QueueStore, StoreError};

use crate::config::OrphanPolicy;

/// What happened to the batch taken by one expansion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpansionOutcome {
    /// Every child was created.
    Expanded { batch_id: DbId, jobs: u64 },
    /// Prompt generation or persistence failed; the batch is now failed.
    Failed {
        batch_id: DbId,
        error: String,
        cancelled_jobs: u64,
    },
    /// The batch was cancelled while its children were being created.
    Interrupted { batch_id: DbId, jobs: u64 },
}

pub struct BatchExpander {
    store: Arc<dyn QueueStore>,
    chunk_size: usize,
    orphan_policy: OrphanPolicy,
}

impl BatchExpander {
    pub fn new(store: Arc<dyn QueueStore>, chunk_size: usize, orphan_policy: OrphanPolicy) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            orphan_policy,
        }
    }

    /// Expand the oldest queued batch, if any.
    ///
    /// Only a failure to claim the batch or to record its failure is
    /// returned as an error; everything else ends up on the batch row.
    pub async fn expand_next(&self) -> Result<Option<ExpansionOutcome>, StoreError> {
        let Some(batch) = self.store.claim_next_batch().await? else {
            return Ok(None);
        };
        tracing::info!(
            batch_id = batch.id,
            total_images = batch.total_images,
            "Expanding batch",
        );

        let prompts = match build_prompts(&batch) {
            Ok(prompts) => prompts,
            Err(error) => return self.fail(&batch, error, 0).await.map(Some),
        };

        let mut inserted: u64 = 0;
        for (chunk_index, chunk) in prompts.chunks(self.chunk_size).enumerate() {
            let offset = chunk_index * self.chunk_size;
            let children: Vec<NewBatchChild> = chunk
                .iter()
                .enumerate()
                .map(|(i, prompt)| NewBatchChild {
                    prompt: prompt.clone(),
                    filename: batch_child_filename(batch.id, offset + i),
                })
                .collect();

            match self.store.insert_batch_children(&batch, &children).await {
                Ok(Some(count)) => inserted += count,
                Ok(None) => {
                    tracing::info!(
                        batch_id = batch.id,
                        jobs = inserted,
                        "Batch left generating during expansion, stopping",
                    );
                    return Ok(Some(ExpansionOutcome::Interrupted {
                        batch_id: batch.id,
                        jobs: inserted,
                    }));
                }
                Err(e) => {
                    let error = format!("Failed to create jobs after {inserted}: {e}");
                    return self.fail(&batch, error, inserted).await.map(Some);
                }
            }
        }

        tracing::info!(batch_id = batch.id, jobs = inserted, "Batch expanded");
        Ok(Some(ExpansionOutcome::Expanded {
            batch_id: batch.id,
            jobs: inserted,
        }))
    }

    async fn fail(
        &self,
        batch: &BatchJob,
        error: String,
        inserted: u64,
    ) -> Result<ExpansionOutcome, StoreError> {
        tracing::error!(
            batch_id = batch.id,
            jobs_created = inserted,
            orphan_policy = ?self.orphan_policy,
            error = %error,
            "Batch expansion failed",
        );
        let cancelled_jobs = self
            .store
            .fail_batch(batch.id, &error, self.orphan_policy.cancels_children())
            .await?
            .map_or(0, |t| t.cancelled_jobs);
        Ok(ExpansionOutcome::Failed {
            batch_id: batch.id,
            error,
            cancelled_jobs,
        })
    }
}

/// Prompts for every child of `batch`, in child order.
///
/// Non-unique batches are seeded with the batch ID so re-running the
/// expansion for the same batch reproduces the same prompts.
pub fn build_prompts(batch: &BatchJob) -> Result<Vec<String>, String> {
    let count = usize::try_from(batch.total_images)
        .map_err(|_| format!("Invalid total_images {}", batch.total_images))?;
    let mode = SamplingMode::from_unique(batch.unique_prompts, batch.id.unsigned_abs());
    PromptExpander::new(
        &batch.target_subject,
        &batch.variations.0,
        batch.base_prompt_template.as_deref(),
    )
    .and_then(|expander| expander.generate(count, mode))
    .map_err(|e| e.to_string())
}
