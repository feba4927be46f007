//! The queue store abstraction used by the worker and the pipeline.
//!
//! Every method is one atomic operation against the store. Callers never
//! read a row and then write it back; transitions are conditional on the
//! prior status so independent workers cannot act on the same row.

use async_trait::async_trait;
use mayagen_core::types::{DbId, Timestamp};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::batch_job::{BatchJob, BatchTermination, NewBatchJob};
use crate::models::job::{ClaimedJob, Job, JobFinish, JobOutcome, NewBatchChild, NewJob};
use crate::repositories::{BatchJobRepo, JobRepo};
use crate::DbPool;

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a standalone job as queued.
    async fn insert_job(&self, input: &NewJob) -> Result<Job, StoreError>;

    /// Insert a batch as queued.
    async fn insert_batch(&self, input: &NewBatchJob) -> Result<BatchJob, StoreError>;

    async fn find_job(&self, id: DbId) -> Result<Option<Job>, StoreError>;

    async fn find_batch(&self, id: DbId) -> Result<Option<BatchJob>, StoreError>;

    /// All batches, newest first.
    async fn list_batches(&self) -> Result<Vec<BatchJob>, StoreError>;

    /// Children of a batch in creation order.
    async fn list_batch_jobs(&self, batch_id: DbId) -> Result<Vec<Job>, StoreError>;

    /// Move the oldest queued batch to generating and return it.
    async fn claim_next_batch(&self) -> Result<Option<BatchJob>, StoreError>;

    /// Insert a chunk of children. `None` means the batch stopped
    /// generating and nothing was inserted.
    async fn insert_batch_children(
        &self,
        batch: &BatchJob,
        children: &[NewBatchChild],
    ) -> Result<Option<u64>, StoreError>;

    /// Fail a generating batch. `None` if it was no longer generating.
    async fn fail_batch(
        &self,
        batch_id: DbId,
        error: &str,
        cancel_queued_children: bool,
    ) -> Result<Option<BatchTermination>, StoreError>;

    /// Cancel a queued or generating batch and its queued children.
    /// `None` if the batch is missing or already terminal.
    async fn cancel_batch(&self, batch_id: DbId) -> Result<Option<BatchTermination>, StoreError>;

    /// Cancel a queued standalone job. `None` if it is missing, belongs to a
    /// batch, or has left the queue.
    async fn cancel_job(&self, job_id: DbId) -> Result<Option<Job>, StoreError>;

    /// Claim the oldest queued job for `worker`.
    async fn claim_next_job(&self, worker: &str) -> Result<Option<ClaimedJob>, StoreError>;

    /// Record a terminal outcome for a claimed job and update its batch.
    async fn finish_job(
        &self,
        job_id: DbId,
        token: Uuid,
        outcome: &JobOutcome,
    ) -> Result<JobFinish, StoreError>;

    /// Requeue processing jobs claimed before `claimed_before`.
    async fn requeue_stale_jobs(&self, claimed_before: Timestamp) -> Result<Vec<DbId>, StoreError>;

    /// Fail generating batches whose expansion heartbeat predates
    /// `heartbeat_before` and that are still missing children.
    async fn fail_stalled_expansions(
        &self,
        heartbeat_before: Timestamp,
        error: &str,
        cancel_queued_children: bool,
    ) -> Result<Vec<BatchTermination>, StoreError>;

    /// Confirm the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Postgres-backed store, safe across worker processes.
#[derive(Clone)]
pub struct PgQueueStore {
    pool: DbPool,
}

impl PgQueueStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn insert_job(&self, input: &NewJob) -> Result<Job, StoreError> {
        Ok(JobRepo::create(&self.pool, input).await?)
    }

    async fn insert_batch(&self, input: &NewBatchJob) -> Result<BatchJob, StoreError> {
        Ok(BatchJobRepo::create(&self.pool, input).await?)
    }

    async fn find_job(&self, id: DbId) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_batch(&self, id: DbId) -> Result<Option<BatchJob>, StoreError> {
        Ok(BatchJobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_batches(&self) -> Result<Vec<BatchJob>, StoreError> {
        Ok(BatchJobRepo::list(&self.pool).await?)
    }

    async fn list_batch_jobs(&self, batch_id: DbId) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::list_by_batch(&self.pool, batch_id).await?)
    }

    async fn claim_next_batch(&self) -> Result<Option<BatchJob>, StoreError> {
        Ok(BatchJobRepo::claim_next(&self.pool).await?)
    }

    async fn insert_batch_children(
        &self,
        batch: &BatchJob,
        children: &[NewBatchChild],
    ) -> Result<Option<u64>, StoreError> {
        Ok(BatchJobRepo::insert_children(&self.pool, batch, children).await?)
    }

    async fn fail_batch(
        &self,
        batch_id: DbId,
        error: &str,
        cancel_queued_children: bool,
    ) -> Result<Option<BatchTermination>, StoreError> {
        Ok(BatchJobRepo::fail(&self.pool, batch_id, error, cancel_queued_children).await?)
    }

    async fn cancel_batch(&self, batch_id: DbId) -> Result<Option<BatchTermination>, StoreError> {
        Ok(BatchJobRepo::cancel(&self.pool, batch_id).await?)
    }

    async fn cancel_job(&self, job_id: DbId) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::cancel_standalone(&self.pool, job_id).await?)
    }

    async fn claim_next_job(&self, worker: &str) -> Result<Option<ClaimedJob>, StoreError> {
        Ok(JobRepo::claim_next(&self.pool, worker).await?)
    }

    async fn finish_job(
        &self,
        job_id: DbId,
        token: Uuid,
        outcome: &JobOutcome,
    ) -> Result<JobFinish, StoreError> {
        Ok(JobRepo::finish(&self.pool, job_id, token, outcome).await?)
    }

    async fn requeue_stale_jobs(&self, claimed_before: Timestamp) -> Result<Vec<DbId>, StoreError> {
        Ok(JobRepo::requeue_stale(&self.pool, claimed_before).await?)
    }

    async fn fail_stalled_expansions(
        &self,
        heartbeat_before: Timestamp,
        error: &str,
        cancel_queued_children: bool,
    ) -> Result<Vec<BatchTermination>, StoreError> {
        Ok(BatchJobRepo::fail_stalled_expansions(
            &self.pool,
            heartbeat_before,
            error,
            cancel_queued_children,
        )
        .await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(crate::health_check(&self.pool).await?)
    }
}
