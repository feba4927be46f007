//! Repository for the `batch_jobs` table.

use mayagen_core::types::{DbId, Timestamp};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::batch_job::{BatchJob, BatchTermination, NewBatchJob};
use crate::models::job::NewBatchChild;
use crate::models::status::{BatchJobStatus, JobStatus};

/// Column list for `batch_jobs` queries.
pub(crate) const COLUMNS: &str = "\
    id, user_id, name, category, target_subject, variations, \
    base_prompt_template, unique_prompts, total_images, \
    generated_count, failed_count, model, provider, width, height, \
    status_id, error_message, expansion_heartbeat_at, created_at, updated_at";

/// Provides queue operations for batch jobs and their expansion.
pub struct BatchJobRepo;

impl BatchJobRepo {
    /// Insert a batch in the queued state.
    pub async fn create(pool: &PgPool, input: &NewBatchJob) -> Result<BatchJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO batch_jobs \
                 (user_id, name, category, target_subject, variations, base_prompt_template, \
                  unique_prompts, total_images, model, provider, width, height, status_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BatchJob>(&query)
            .bind(input.user_id)
            .bind(&input.name)
            .bind(&input.category)
            .bind(&input.target_subject)
            .bind(Json(&input.variations))
            .bind(&input.base_prompt_template)
            .bind(input.unique_prompts)
            .bind(input.total_images)
            .bind(&input.model)
            .bind(&input.provider)
            .bind(input.width)
            .bind(input.height)
            .bind(BatchJobStatus::Queued.id())
            .fetch_one(pool)
            .await
    }

    /// Find a batch by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<BatchJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM batch_jobs WHERE id = $1");
        sqlx::query_as::<_, BatchJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Atomically move the oldest queued batch to generating.
    ///
    /// A batch returned here is never returned again, which is the
    /// exactly-once guard for expansion.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<BatchJob>, sqlx::Error> {
        let query = format!(
            "UPDATE batch_jobs \
             SET status_id = $1, expansion_heartbeat_at = NOW(), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM batch_jobs \
                 WHERE status_id = $2 \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BatchJob>(&query)
            .bind(BatchJobStatus::Generating.id())
            .bind(BatchJobStatus::Queued.id())
            .fetch_optional(pool)
            .await
    }

    /// Insert one chunk of children for a generating batch.
    ///
    /// Locks the batch row and renews its expansion heartbeat first. Returns
    /// `None` without inserting when the batch is no longer generating
    /// (cancelled or reaped mid-expansion).
    pub async fn insert_children(
        pool: &PgPool,
        batch: &BatchJob,
        children: &[NewBatchChild],
    ) -> Result<Option<u64>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let generating: Option<(DbId,)> = sqlx::query_as(
            "UPDATE batch_jobs SET expansion_heartbeat_at = NOW() \
             WHERE id = $1 AND status_id = $2 \
             RETURNING id",
        )
        .bind(batch.id)
        .bind(BatchJobStatus::Generating.id())
        .fetch_optional(&mut *tx)
        .await?;
        if generating.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let prompts: Vec<String> = children.iter().map(|c| c.prompt.clone()).collect();
        let filenames: Vec<String> = children.iter().map(|c| c.filename.clone()).collect();

        let result = sqlx::query(
            "INSERT INTO jobs \
                 (batch_job_id, user_id, prompt, width, height, model, provider, \
                  category, filename, status_id) \
             SELECT $1, $2, t.prompt, $3, $4, $5, $6, $7, t.filename, $8 \
             FROM UNNEST($9::TEXT[], $10::TEXT[]) WITH ORDINALITY AS t(prompt, filename, ord) \
             ORDER BY t.ord",
        )
        .bind(batch.id)
        .bind(batch.user_id)
        .bind(batch.width)
        .bind(batch.height)
        .bind(&batch.model)
        .bind(&batch.provider)
        .bind(&batch.category)
        .bind(JobStatus::Queued.id())
        .bind(prompts)
        .bind(filenames)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(result.rows_affected()))
    }

    /// Mark a generating batch failed, optionally cancelling its queued
    /// children in the same transaction.
    pub async fn fail(
        pool: &PgPool,
        id: DbId,
        error: &str,
        cancel_queued_children: bool,
    ) -> Result<Option<BatchTermination>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE batch_jobs SET status_id = $2, error_message = $3, updated_at = NOW() \
             WHERE id = $1 AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        let batch = sqlx::query_as::<_, BatchJob>(&query)
            .bind(id)
            .bind(BatchJobStatus::Failed.id())
            .bind(error)
            .bind(BatchJobStatus::Generating.id())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(batch) = batch else {
            tx.rollback().await?;
            return Ok(None);
        };

        let cancelled_jobs = if cancel_queued_children {
            cancel_children_in(&mut tx, id).await?
        } else {
            0
        };

        tx.commit().await?;
        Ok(Some(BatchTermination {
            batch,
            cancelled_jobs,
        }))
    }

    /// Fail every generating batch whose expansion heartbeat is older than
    /// `heartbeat_before` and which has fewer children than `total_images`.
    ///
    /// Rows locked by a live expansion are skipped. A fully expanded batch
    /// is never touched: its progress comes from its children.
    pub async fn fail_stalled_expansions(
        pool: &PgPool,
        heartbeat_before: Timestamp,
        error: &str,
        cancel_queued_children: bool,
    ) -> Result<Vec<BatchTermination>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE batch_jobs SET status_id = $3, error_message = $4, updated_at = NOW() \
             WHERE id IN ( \
                 SELECT b.id FROM batch_jobs b \
                 WHERE b.status_id = $1 \
                   AND b.expansion_heartbeat_at < $2 \
                   AND (SELECT COUNT(*) FROM jobs j WHERE j.batch_job_id = b.id) < b.total_images \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let batches = sqlx::query_as::<_, BatchJob>(&query)
            .bind(BatchJobStatus::Generating.id())
            .bind(heartbeat_before)
            .bind(BatchJobStatus::Failed.id())
            .bind(error)
            .fetch_all(&mut *tx)
            .await?;

        let mut failed = Vec::with_capacity(batches.len());
        for batch in batches {
            let cancelled_jobs = if cancel_queued_children {
                cancel_children_in(&mut tx, batch.id).await?
            } else {
                0
            };
            failed.push(BatchTermination {
                batch,
                cancelled_jobs,
            });
        }

        tx.commit().await?;
        Ok(failed)
    }

    /// All batches, newest first.
    pub async fn list(pool: &PgPool) -> Result<Vec<BatchJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM batch_jobs ORDER BY created_at DESC, id DESC");
        sqlx::query_as::<_, BatchJob>(&query).fetch_all(pool).await
    }

    /// Cancel a queued or generating batch and all of its queued children
    /// in one transaction. Returns `None` if the batch was not cancellable.
    pub async fn cancel(pool: &PgPool, id: DbId) -> Result<Option<BatchTermination>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE batch_jobs SET status_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status_id IN ($3, $4) \
             RETURNING {COLUMNS}"
        );
        let batch = sqlx::query_as::<_, BatchJob>(&query)
            .bind(id)
            .bind(BatchJobStatus::Cancelled.id())
            .bind(BatchJobStatus::Queued.id())
            .bind(BatchJobStatus::Generating.id())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(batch) = batch else {
            tx.rollback().await?;
            return Ok(None);
        };

        let cancelled_jobs = cancel_children_in(&mut tx, id).await?;

        tx.commit().await?;
        Ok(Some(BatchTermination {
            batch,
            cancelled_jobs,
        }))
    }
}

async fn cancel_children_in(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    batch_id: DbId,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE jobs SET status_id = $2, updated_at = NOW() \
         WHERE batch_job_id = $1 AND status_id = $3",
    )
    .bind(batch_id)
    .bind(JobStatus::Cancelled.id())
    .bind(JobStatus::Queued.id())
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}
