//! In-process queue store.
//!
//! Keeps the same transition rules as the Postgres store behind a single
//! mutex. Only safe within one process; used by tests and by
//! `QUEUE_BACKEND=memory` for local runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use mayagen_core::types::{DbId, Timestamp};
use sqlx::types::Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::batch_job::{BatchJob, BatchTermination, NewBatchJob};
use crate::models::job::{ClaimedJob, Job, JobFinish, JobOutcome, NewBatchChild, NewJob};
use crate::models::status::{BatchJobStatus, JobStatus};
use crate::store::QueueStore;

#[derive(Default)]
struct Tables {
    jobs: BTreeMap<DbId, Job>,
    batches: BTreeMap<DbId, BatchJob>,
    next_job_id: DbId,
    next_batch_id: DbId,
}

impl Tables {
    fn next_job_id(&mut self) -> DbId {
        self.next_job_id += 1;
        self.next_job_id
    }

    fn next_batch_id(&mut self) -> DbId {
        self.next_batch_id += 1;
        self.next_batch_id
    }

    fn child_count(&self, batch_id: DbId) -> usize {
        self.jobs
            .values()
            .filter(|job| job.batch_job_id == Some(batch_id))
            .count()
    }

    fn cancel_queued_children(&mut self, batch_id: DbId, now: Timestamp) -> u64 {
        let mut cancelled = 0;
        for job in self.jobs.values_mut() {
            if job.batch_job_id == Some(batch_id) && job.status_id == JobStatus::Queued.id() {
                job.status_id = JobStatus::Cancelled.id();
                job.updated_at = now;
                cancelled += 1;
            }
        }
        cancelled
    }
}

/// Mutex-guarded store. IDs are assigned in insertion order, so iteration
/// order is creation order.
#[derive(Default)]
pub struct MemoryQueueStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`]
    /// until switched back. Simulates a database outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store is switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert_job(&self, input: &NewJob) -> Result<Job, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let job = Job {
            id: tables.next_job_id(),
            batch_job_id: None,
            user_id: input.user_id,
            prompt: input.prompt.clone(),
            width: input.width,
            height: input.height,
            model: input.model.clone(),
            provider: input.provider.clone(),
            category: input.category.clone(),
            filename: input.filename.clone(),
            output_path: None,
            status_id: JobStatus::Queued.id(),
            error_message: None,
            claimed_by: None,
            claim_token: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn insert_batch(&self, input: &NewBatchJob) -> Result<BatchJob, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let batch = BatchJob {
            id: tables.next_batch_id(),
            user_id: input.user_id,
            name: input.name.clone(),
            category: input.category.clone(),
            target_subject: input.target_subject.clone(),
            variations: Json(input.variations.clone()),
            base_prompt_template: input.base_prompt_template.clone(),
            unique_prompts: input.unique_prompts,
            total_images: input.total_images,
            generated_count: 0,
            failed_count: 0,
            model: input.model.clone(),
            provider: input.provider.clone(),
            width: input.width,
            height: input.height,
            status_id: BatchJobStatus::Queued.id(),
            error_message: None,
            expansion_heartbeat_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn find_job(&self, id: DbId) -> Result<Option<Job>, StoreError> {
        self.check_available()?;
        Ok(self.tables.lock().await.jobs.get(&id).cloned())
    }

    async fn find_batch(&self, id: DbId) -> Result<Option<BatchJob>, StoreError> {
        self.check_available()?;
        Ok(self.tables.lock().await.batches.get(&id).cloned())
    }

    async fn list_batch_jobs(&self, batch_id: DbId) -> Result<Vec<Job>, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .values()
            .filter(|job| job.batch_job_id == Some(batch_id))
            .cloned()
            .collect())
    }

    async fn claim_next_batch(&self) -> Result<Option<BatchJob>, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let next = tables
            .batches
            .values_mut()
            .find(|batch| batch.status_id == BatchJobStatus::Queued.id());
        Ok(next.map(|batch| {
            let now = Utc::now();
            batch.status_id = BatchJobStatus::Generating.id();
            batch.expansion_heartbeat_at = Some(now);
            batch.updated_at = now;
            batch.clone()
        }))
    }

    async fn insert_batch_children(
        &self,
        batch: &BatchJob,
        children: &[NewBatchChild],
    ) -> Result<Option<u64>, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let Some(current) = tables
            .batches
            .get_mut(&batch.id)
            .filter(|current| current.status_id == BatchJobStatus::Generating.id())
        else {
            return Ok(None);
        };
        current.expansion_heartbeat_at = Some(now);

        for child in children {
            let job = Job {
                id: tables.next_job_id(),
                batch_job_id: Some(batch.id),
                user_id: batch.user_id,
                prompt: child.prompt.clone(),
                width: batch.width,
                height: batch.height,
                model: batch.model.clone(),
                provider: batch.provider.clone(),
                category: batch.category.clone(),
                filename: child.filename.clone(),
                output_path: None,
                status_id: JobStatus::Queued.id(),
                error_message: None,
                claimed_by: None,
                claim_token: None,
                claimed_at: None,
                created_at: now,
                updated_at: now,
            };
            tables.jobs.insert(job.id, job);
        }
        Ok(Some(children.len() as u64))
    }

    async fn fail_batch(
        &self,
        batch_id: DbId,
        error: &str,
        cancel_queued_children: bool,
    ) -> Result<Option<BatchTermination>, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let Some(batch) = tables
            .batches
            .get_mut(&batch_id)
            .filter(|batch| batch.status_id == BatchJobStatus::Generating.id())
        else {
            return Ok(None);
        };
        batch.status_id = BatchJobStatus::Failed.id();
        batch.error_message = Some(error.to_string());
        batch.updated_at = now;
        let batch = batch.clone();

        let cancelled_jobs = if cancel_queued_children {
            tables.cancel_queued_children(batch_id, now)
        } else {
            0
        };
        Ok(Some(BatchTermination {
            batch,
            cancelled_jobs,
        }))
    }

    async fn cancel_batch(&self, batch_id: DbId) -> Result<Option<BatchTermination>, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let Some(batch) = tables.batches.get_mut(&batch_id).filter(|batch| {
            batch
                .status()
                .is_some_and(BatchJobStatus::is_cancellable)
        }) else {
            return Ok(None);
        };
        batch.status_id = BatchJobStatus::Cancelled.id();
        batch.updated_at = now;
        let batch = batch.clone();

        let cancelled_jobs = tables.cancel_queued_children(batch_id, now);
        Ok(Some(BatchTermination {
            batch,
            cancelled_jobs,
        }))
    }

    async fn cancel_job(&self, job_id: DbId) -> Result<Option<Job>, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let job = tables.jobs.get_mut(&job_id).filter(|job| {
            job.status_id == JobStatus::Queued.id() && job.batch_job_id.is_none()
        });
        Ok(job.map(|job| {
            job.status_id = JobStatus::Cancelled.id();
            job.updated_at = Utc::now();
            job.clone()
        }))
    }

    async fn claim_next_job(&self, worker: &str) -> Result<Option<ClaimedJob>, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let next = tables
            .jobs
            .values_mut()
            .find(|job| job.status_id == JobStatus::Queued.id());
        Ok(next.map(|job| {
            let token = Uuid::new_v4();
            let now = Utc::now();
            job.status_id = JobStatus::Processing.id();
            job.claimed_by = Some(worker.to_string());
            job.claim_token = Some(token);
            job.claimed_at = Some(now);
            job.updated_at = now;
            ClaimedJob {
                job: job.clone(),
                token,
            }
        }))
    }

    async fn finish_job(
        &self,
        job_id: DbId,
        token: Uuid,
        outcome: &JobOutcome,
    ) -> Result<JobFinish, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let Some(job) = tables.jobs.get_mut(&job_id).filter(|job| {
            job.status_id == JobStatus::Processing.id() && job.claim_token == Some(token)
        }) else {
            return Ok(JobFinish::lost_claim());
        };
        job.status_id = outcome.status().id();
        match outcome {
            JobOutcome::Completed { output_path } => job.output_path = Some(output_path.clone()),
            JobOutcome::Failed { error } => job.error_message = Some(error.clone()),
        }
        job.updated_at = now;
        let batch_id = job.batch_job_id;

        let batch = batch_id
            .and_then(|id| tables.batches.get_mut(&id))
            .filter(|batch| batch.status_id == BatchJobStatus::Generating.id())
            .map(|batch| {
                match outcome {
                    JobOutcome::Completed { .. } => batch.generated_count += 1,
                    JobOutcome::Failed { .. } => batch.failed_count += 1,
                }
                if batch.settled_count() >= batch.total_images {
                    batch.status_id = BatchJobStatus::Completed.id();
                }
                batch.updated_at = now;
                batch.clone()
            });

        Ok(JobFinish {
            recorded: true,
            batch,
        })
    }

    async fn requeue_stale_jobs(&self, claimed_before: Timestamp) -> Result<Vec<DbId>, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let mut requeued = Vec::new();
        for job in tables.jobs.values_mut() {
            let stale = job.status_id == JobStatus::Processing.id()
                && job.claimed_at.is_some_and(|at| at < claimed_before);
            if stale {
                job.status_id = JobStatus::Queued.id();
                job.claimed_by = None;
                job.claim_token = None;
                job.claimed_at = None;
                job.updated_at = now;
                requeued.push(job.id);
            }
        }
        Ok(requeued)
    }

    async fn fail_stalled_expansions(
        &self,
        heartbeat_before: Timestamp,
        error: &str,
        cancel_queued_children: bool,
    ) -> Result<Vec<BatchTermination>, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let stalled: Vec<DbId> = tables
            .batches
            .values()
            .filter(|batch| {
                batch.status_id == BatchJobStatus::Generating.id()
                    && batch
                        .expansion_heartbeat_at
                        .is_some_and(|at| at < heartbeat_before)
            })
            .filter(|batch| tables.child_count(batch.id) < batch.total_images as usize)
            .map(|batch| batch.id)
            .collect();

        let mut failed = Vec::with_capacity(stalled.len());
        for batch_id in stalled {
            let Some(batch) = tables.batches.get_mut(&batch_id) else {
                continue;
            };
            batch.status_id = BatchJobStatus::Failed.id();
            batch.error_message = Some(error.to_string());
            batch.updated_at = now;
            let batch = batch.clone();

            let cancelled_jobs = if cancel_queued_children {
                tables.cancel_queued_children(batch_id, now)
            } else {
                0
            };
            failed.push(BatchTermination {
                batch,
                cancelled_jobs,
            });
        }
        Ok(failed)
    }

    async fn list_batches(&self) -> Result<Vec<BatchJob>, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables.batches.values().rev().cloned().collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
