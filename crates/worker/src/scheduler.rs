//! The worker loop.
//!
//! Each iteration first tries to expand one queued batch; if it did, the
//! iteration ends there. Otherwise it claims the oldest queued job and
//! runs it to completion before looking again. One job is in flight per
//! scheduler; throughput scales by running more worker processes against
//! the same store.

use std::sync::Arc;
use std::time::Duration;

use mayagen_core::types::DbId;
use mayagen_db::models::job::JobOutcome;
use mayagen_db::models::status::JobStatus;
use mayagen_db::{QueueStore, StoreError};
use tokio_util::sync::CancellationToken;

use crate::executor::JobExecutor;
use crate::expander::{BatchExpander, ExpansionOutcome};

/// What one iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// A batch was taken for expansion.
    Expanded(ExpansionOutcome),
    /// A job was claimed and executed.
    Executed {
        job_id: DbId,
        status: JobStatus,
        /// `false` if the claim had been reaped before the result landed.
        recorded: bool,
    },
    /// Nothing to do.
    Idle,
}

/// Loop delays.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerTiming {
    /// Sleep after an iteration that found no work.
    pub idle_delay: Duration,
    /// Sleep after a store failure.
    pub error_backoff: Duration,
}

pub struct Scheduler {
    store: Arc<dyn QueueStore>,
    expander: BatchExpander,
    executor: JobExecutor,
    worker_name: String,
    timing: SchedulerTiming,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn QueueStore>,
        expander: BatchExpander,
        executor: JobExecutor,
        worker_name: String,
        timing: SchedulerTiming,
    ) -> Self {
        Self {
            store,
            expander,
            executor,
            worker_name,
            timing,
        }
    }

    /// Run until `cancel` fires. A job already in flight is finished and
    /// recorded before returning.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            worker = %self.worker_name,
            idle_delay_ms = self.timing.idle_delay.as_millis() as u64,
            error_backoff_ms = self.timing.error_backoff.as_millis() as u64,
            "Scheduler started",
        );

        while !cancel.is_cancelled() {
            let pause = match self.run_once().await {
                Ok(Tick::Idle) => Some(self.timing.idle_delay),
                Ok(_) => None,
                Err(e) => {
                    tracing::error!(
                        worker = %self.worker_name,
                        error = %e,
                        backoff_ms = self.timing.error_backoff.as_millis() as u64,
                        "Queue store error, backing off",
                    );
                    Some(self.timing.error_backoff)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        tracing::info!(worker = %self.worker_name, "Scheduler shutting down");
    }

    /// One iteration: expand a batch, else execute a job, else report idle.
    pub async fn run_once(&self) -> Result<Tick, StoreError> {
        if let Some(outcome) = self.expander.expand_next().await? {
            return Ok(Tick::Expanded(outcome));
        }

        let Some(claimed) = self.store.claim_next_job(&self.worker_name).await? else {
            return Ok(Tick::Idle);
        };
        let job = claimed.job;
        tracing::info!(
            job_id = job.id,
            batch_id = job.batch_job_id,
            worker = %self.worker_name,
            provider = %job.provider,
            model = %job.model,
            "Job claimed",
        );

        let outcome = self.executor.execute(&job).await;
        match &outcome {
            JobOutcome::Completed { output_path } => {
                tracing::info!(job_id = job.id, output_path = %output_path, "Job completed");
            }
            JobOutcome::Failed { error } => {
                tracing::warn!(job_id = job.id, error = %error, "Job failed");
            }
        }

        let finish = self.store.finish_job(job.id, claimed.token, &outcome).await?;
        if !finish.recorded {
            tracing::warn!(
                job_id = job.id,
                worker = %self.worker_name,
                "Claim was reaped before the result was recorded; result discarded",
            );
        }
        if let Some(batch) = &finish.batch {
            tracing::debug!(
                batch_id = batch.id,
                generated_count = batch.generated_count,
                failed_count = batch.failed_count,
                total_images = batch.total_images,
                status = batch.status().map_or("unknown", |s| s.label()),
                "Batch progress",
            );
        }

        Ok(Tick::Executed {
            job_id: job.id,
            status: outcome.status(),
            recorded: finish.recorded,
        })
    }
}
