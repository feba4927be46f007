//! Repository for the `jobs` table.

use mayagen_core::types::{DbId, Timestamp};
use sqlx::PgPool;
use uuid::Uuid;

use super::batch_job_repo::COLUMNS as BATCH_COLUMNS;
use crate::models::batch_job::BatchJob;
use crate::models::job::{ClaimedJob, Job, JobFinish, JobOutcome, NewJob};
use crate::models::status::{BatchJobStatus, JobStatus};

/// Column list for `jobs` queries.
pub(crate) const COLUMNS: &str = "\
    id, batch_job_id, user_id, prompt, width, height, model, provider, \
    category, filename, output_path, status_id, error_message, \
    claimed_by, claim_token, claimed_at, created_at, updated_at";

/// Provides queue operations for image jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a standalone job in the queued state.
    pub async fn create(pool: &PgPool, input: &NewJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs \
                 (user_id, prompt, width, height, model, provider, category, filename, status_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(input.user_id)
            .bind(&input.prompt)
            .bind(input.width)
            .bind(input.height)
            .bind(&input.model)
            .bind(&input.provider)
            .bind(&input.category)
            .bind(&input.filename)
            .bind(JobStatus::Queued.id())
            .fetch_one(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All children of a batch in creation order.
    pub async fn list_by_batch(pool: &PgPool, batch_id: DbId) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE batch_job_id = $1 ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(batch_id)
            .fetch_all(pool)
            .await
    }

    /// Atomically claim the oldest queued job for a worker.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent claimers never
    /// receive the same row. The returned token must be presented again
    /// to [`JobRepo::finish`].
    pub async fn claim_next(
        pool: &PgPool,
        worker: &str,
    ) -> Result<Option<ClaimedJob>, sqlx::Error> {
        let token = Uuid::new_v4();
        let query = format!(
            "UPDATE jobs \
             SET status_id = $1, claimed_by = $2, claim_token = $3, \
                 claimed_at = NOW(), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status_id = $4 \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Processing.id())
            .bind(worker)
            .bind(token)
            .bind(JobStatus::Queued.id())
            .fetch_optional(pool)
            .await?;
        Ok(job.map(|job| ClaimedJob { job, token }))
    }

    /// Record a terminal outcome and bump the parent batch's counters.
    ///
    /// Both writes share one transaction. The job update only applies while
    /// the caller still holds the claim; the batch update only applies
    /// while the batch is generating and flips it to completed when the
    /// counters reach `total_images`.
    pub async fn finish(
        pool: &PgPool,
        job_id: DbId,
        token: Uuid,
        outcome: &JobOutcome,
    ) -> Result<JobFinish, sqlx::Error> {
        let (output_path, error) = match outcome {
            JobOutcome::Completed { output_path } => (Some(output_path.as_str()), None),
            JobOutcome::Failed { error } => (None, Some(error.as_str())),
        };

        let mut tx = pool.begin().await?;

        let batch_ref: Option<(Option<DbId>,)> = sqlx::query_as(
            "UPDATE jobs \
             SET status_id = $3, output_path = $4, error_message = $5, updated_at = NOW() \
             WHERE id = $1 AND status_id = $6 AND claim_token = $2 \
             RETURNING batch_job_id",
        )
        .bind(job_id)
        .bind(token)
        .bind(outcome.status().id())
        .bind(output_path)
        .bind(error)
        .bind(JobStatus::Processing.id())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((batch_id,)) = batch_ref else {
            tx.rollback().await?;
            tracing::debug!(job_id, %token, "Finish ignored: claim no longer held");
            return Ok(JobFinish::lost_claim());
        };

        let batch = match batch_id {
            Some(batch_id) => {
                let (generated, failed) = match outcome {
                    JobOutcome::Completed { .. } => (1_i32, 0_i32),
                    JobOutcome::Failed { .. } => (0, 1),
                };
                let query = format!(
                    "UPDATE batch_jobs \
                     SET generated_count = generated_count + $2, \
                         failed_count = failed_count + $3, \
                         status_id = CASE \
                             WHEN generated_count + failed_count + 1 >= total_images THEN $4 \
                             ELSE status_id \
                         END, \
                         updated_at = NOW() \
                     WHERE id = $1 AND status_id = $5 \
                     RETURNING {BATCH_COLUMNS}"
                );
                sqlx::query_as::<_, BatchJob>(&query)
                    .bind(batch_id)
                    .bind(generated)
                    .bind(failed)
                    .bind(BatchJobStatus::Completed.id())
                    .bind(BatchJobStatus::Generating.id())
                    .fetch_optional(&mut *tx)
                    .await?
            }
            None => None,
        };

        tx.commit().await?;
        Ok(JobFinish {
            recorded: true,
            batch,
        })
    }

    /// Cancel a queued standalone job. Batch children are left alone.
    pub async fn cancel_standalone(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET status_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status_id = $3 AND batch_job_id IS NULL \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Cancelled.id())
            .bind(JobStatus::Queued.id())
            .fetch_optional(pool)
            .await
    }

    /// Return processing jobs claimed before `claimed_before` to the queue.
    ///
    /// Clears the claim so a late finish from the original worker is
    /// rejected. Returns the requeued job IDs.
    pub async fn requeue_stale(
        pool: &PgPool,
        claimed_before: Timestamp,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        let rows: Vec<(DbId,)> = sqlx::query_as(
            "UPDATE jobs \
             SET status_id = $2, claimed_by = NULL, claim_token = NULL, \
                 claimed_at = NULL, updated_at = NOW() \
             WHERE status_id = $3 AND claimed_at < $1 \
             RETURNING id",
        )
        .bind(claimed_before)
        .bind(JobStatus::Queued.id())
        .bind(JobStatus::Processing.id())
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
