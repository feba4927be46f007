//! Job entity models and DTOs.

use mayagen_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::batch_job::BatchJob;
use super::status::{JobStatus, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub batch_job_id: Option<DbId>,
    pub user_id: Option<DbId>,
    pub prompt: String,
    pub width: i32,
    pub height: i32,
    pub model: String,
    pub provider: String,
    pub category: String,
    pub filename: String,
    pub output_path: Option<String>,
    pub status_id: StatusId,
    pub error_message: Option<String>,
    pub claimed_by: Option<String>,
    #[serde(skip_serializing)]
    pub claim_token: Option<Uuid>,
    pub claimed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Typed status. `None` only if the row carries an unknown id.
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.status_id)
    }
}

/// A job together with the name of its status, as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct JobWithStatus {
    #[serde(flatten)]
    pub job: Job,
    pub status: Option<JobStatus>,
}

impl From<Job> for JobWithStatus {
    fn from(job: Job) -> Self {
        Self {
            status: job.status(),
            job,
        }
    }
}

/// Insert DTO for a standalone job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: Option<DbId>,
    pub prompt: String,
    pub width: i32,
    pub height: i32,
    pub model: String,
    pub provider: String,
    /// Already sanitized.
    pub category: String,
    pub filename: String,
}

/// One child produced by batch expansion. Settings come from the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBatchChild {
    pub prompt: String,
    pub filename: String,
}

/// A job handed to exactly one worker, with the token that proves it.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    pub token: Uuid,
}

/// How an executed job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { output_path: String },
    Failed { error: String },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Result of recording a job's terminal state.
#[derive(Debug, Clone)]
pub struct JobFinish {
    /// `false` when the claim was no longer held (the job was reaped and
    /// possibly reclaimed), in which case nothing was written.
    pub recorded: bool,
    /// The parent batch after its counters were bumped. `None` for
    /// standalone jobs and for parents that are no longer generating.
    pub batch: Option<BatchJob>,
}

impl JobFinish {
    pub fn lost_claim() -> Self {
        Self {
            recorded: false,
            batch: None,
        }
    }
}
