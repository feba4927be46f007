//! Batch job entity models and DTOs.

use mayagen_core::prompt::Variations;
use mayagen_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

use super::status::{BatchJobStatus, StatusId};

/// A row from the `batch_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BatchJob {
    pub id: DbId,
    pub user_id: Option<DbId>,
    pub name: String,
    pub category: String,
    pub target_subject: String,
    pub variations: Json<Variations>,
    pub base_prompt_template: Option<String>,
    pub unique_prompts: bool,
    pub total_images: i32,
    pub generated_count: i32,
    pub failed_count: i32,
    pub model: String,
    pub provider: String,
    pub width: i32,
    pub height: i32,
    pub status_id: StatusId,
    pub error_message: Option<String>,
    /// Last sign of life from the worker expanding this batch.
    pub expansion_heartbeat_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl BatchJob {
    /// Typed status. `None` only if the row carries an unknown id.
    pub fn status(&self) -> Option<BatchJobStatus> {
        BatchJobStatus::from_id(self.status_id)
    }

    /// Children that reached a terminal state while the batch was generating.
    pub fn settled_count(&self) -> i32 {
        self.generated_count + self.failed_count
    }
}

/// A batch enriched with its status name and completion percentage.
#[derive(Debug, Clone, Serialize)]
pub struct BatchJobWithStatus {
    #[serde(flatten)]
    pub batch: BatchJob,
    pub status: Option<BatchJobStatus>,
    /// Share of `total_images` generated so far, 0.0 to 100.0, one decimal.
    pub progress: f64,
}

impl From<BatchJob> for BatchJobWithStatus {
    fn from(batch: BatchJob) -> Self {
        let progress = if batch.total_images > 0 {
            (f64::from(batch.generated_count) * 1000.0 / f64::from(batch.total_images)).round()
                / 10.0
        } else {
            0.0
        };
        Self {
            status: batch.status(),
            progress,
            batch,
        }
    }
}

/// Insert DTO for a batch job.
#[derive(Debug, Clone)]
pub struct NewBatchJob {
    pub user_id: Option<DbId>,
    pub name: String,
    /// Already sanitized.
    pub category: String,
    pub target_subject: String,
    pub variations: Variations,
    pub base_prompt_template: Option<String>,
    pub unique_prompts: bool,
    pub total_images: i32,
    pub model: String,
    pub provider: String,
    pub width: i32,
    pub height: i32,
}

/// A batch moved to a terminal state together with its queued children.
#[derive(Debug, Clone)]
pub struct BatchTermination {
    pub batch: BatchJob,
    /// Queued children flipped to cancelled in the same transaction.
    pub cancelled_jobs: u64,
}
