//! Shared fixtures for worker integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mayagen_core::prompt::Variations;
use mayagen_core::provider::{GenerationProvider, ProviderError, RenderRequest};
use mayagen_core::types::{DbId, Timestamp};
use mayagen_db::models::batch_job::{BatchJob, BatchTermination, NewBatchJob};
use mayagen_db::models::job::{ClaimedJob, Job, JobFinish, JobOutcome, NewBatchChild, NewJob};
use mayagen_db::{MemoryQueueStore, QueueStore, StoreError};
use mayagen_worker::config::OrphanPolicy;
use mayagen_worker::executor::JobExecutor;
use mayagen_worker::expander::BatchExpander;
use mayagen_worker::providers::ProviderRegistry;
use mayagen_worker::scheduler::{Scheduler, SchedulerTiming};
use uuid::Uuid;

pub const SCRIPTED: &str = "scripted";

/// Provider that answers from a script of outcomes, then succeeds.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<(), String>>>,
    prompts: Mutex<Vec<String>>,
    delay: Duration,
    panics: bool,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<(), String>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    /// Panics on every render.
    pub fn panicking() -> Arc<Self> {
        Arc::new(Self {
            panics: true,
            ..Default::default()
        })
    }

    /// Prompts rendered so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, ProviderError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if self.panics {
            panic!("sampler exploded on {}", request.prompt);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        match next {
            Ok(()) => Ok(format!("image for {}", request.prompt).into_bytes()),
            Err(reason) => Err(ProviderError::Rejected(reason)),
        }
    }
}

pub fn timing() -> SchedulerTiming {
    SchedulerTiming {
        idle_delay: Duration::from_millis(10),
        error_backoff: Duration::from_millis(20),
    }
}

pub fn scheduler(
    store: Arc<dyn QueueStore>,
    provider: Arc<ScriptedProvider>,
    output_dir: &Path,
    name: &str,
) -> Scheduler {
    scheduler_with(
        store,
        provider,
        output_dir,
        name,
        500,
        OrphanPolicy::Run,
        Duration::from_secs(5),
    )
}

pub fn scheduler_with(
    store: Arc<dyn QueueStore>,
    provider: Arc<ScriptedProvider>,
    output_dir: &Path,
    name: &str,
    chunk_size: usize,
    orphan_policy: OrphanPolicy,
    provider_timeout: Duration,
) -> Scheduler {
    let providers = ProviderRegistry::new().with(SCRIPTED, provider);
    Scheduler::new(
        Arc::clone(&store),
        BatchExpander::new(Arc::clone(&store), chunk_size, orphan_policy),
        JobExecutor::new(providers, output_dir.to_path_buf(), provider_timeout),
        name.to_string(),
        timing(),
    )
}

pub fn new_job(prompt: &str) -> NewJob {
    NewJob {
        user_id: None,
        prompt: prompt.to_string(),
        width: 512,
        height: 512,
        model: "sd15".to_string(),
        provider: SCRIPTED.to_string(),
        category: "cats".to_string(),
        filename: format!("{}.png", prompt.replace(' ', "_")),
    }
}

pub fn new_batch(total_images: i32, variations: &[(&str, &[&str])]) -> NewBatchJob {
    let variations: Variations = variations
        .iter()
        .map(|(axis, values)| {
            (
                axis.to_string(),
                values.iter().map(|v| v.to_string()).collect(),
            )
        })
        .collect();
    NewBatchJob {
        user_id: None,
        name: "test batch".to_string(),
        category: "cats".to_string(),
        target_subject: "cat".to_string(),
        variations,
        base_prompt_template: None,
        unique_prompts: true,
        total_images,
        model: "sd15".to_string(),
        provider: SCRIPTED.to_string(),
        width: 512,
        height: 512,
    }
}

/// Memory store whose child inserts start failing (or cancel the batch)
/// after a number of successful chunks.
pub struct FlakyStore {
    pub inner: MemoryQueueStore,
    ok_chunks: usize,
    cancel_instead: bool,
    chunks: AtomicUsize,
}

impl FlakyStore {
    /// Child inserts fail with a store error after `ok_chunks` chunks.
    pub fn failing_after(ok_chunks: usize) -> Self {
        Self {
            inner: MemoryQueueStore::new(),
            ok_chunks,
            cancel_instead: false,
            chunks: AtomicUsize::new(0),
        }
    }

    /// The batch is cancelled right after `ok_chunks` chunks.
    pub fn cancelling_after(ok_chunks: usize) -> Self {
        Self {
            cancel_instead: true,
            ..Self::failing_after(ok_chunks)
        }
    }
}

#[async_trait]
impl QueueStore for FlakyStore {
    async fn insert_job(&self, input: &NewJob) -> Result<Job, StoreError> {
        self.inner.insert_job(input).await
    }

    async fn insert_batch(&self, input: &NewBatchJob) -> Result<BatchJob, StoreError> {
        self.inner.insert_batch(input).await
    }

    async fn find_job(&self, id: DbId) -> Result<Option<Job>, StoreError> {
        self.inner.find_job(id).await
    }

    async fn find_batch(&self, id: DbId) -> Result<Option<BatchJob>, StoreError> {
        self.inner.find_batch(id).await
    }

    async fn list_batches(&self) -> Result<Vec<BatchJob>, StoreError> {
        self.inner.list_batches().await
    }

    async fn list_batch_jobs(&self, batch_id: DbId) -> Result<Vec<Job>, StoreError> {
        self.inner.list_batch_jobs(batch_id).await
    }

    async fn claim_next_batch(&self) -> Result<Option<BatchJob>, StoreError> {
        self.inner.claim_next_batch().await
    }

    async fn insert_batch_children(
        &self,
        batch: &BatchJob,
        children: &[NewBatchChild],
    ) -> Result<Option<u64>, StoreError> {
        let done = self.chunks.fetch_add(1, Ordering::SeqCst);
        if done >= self.ok_chunks {
            if self.cancel_instead {
                self.inner.cancel_batch(batch.id).await?;
            } else {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
        }
        self.inner.insert_batch_children(batch, children).await
    }

    async fn fail_batch(
        &self,
        batch_id: DbId,
        error: &str,
        cancel_queued_children: bool,
    ) -> Result<Option<BatchTermination>, StoreError> {
        self.inner
            .fail_batch(batch_id, error, cancel_queued_children)
            .await
    }

    async fn cancel_batch(&self, batch_id: DbId) -> Result<Option<BatchTermination>, StoreError> {
        self.inner.cancel_batch(batch_id).await
    }

    async fn cancel_job(&self, job_id: DbId) -> Result<Option<Job>, StoreError> {
        self.inner.cancel_job(job_id).await
    }

    async fn claim_next_job(&self, worker: &str) -> Result<Option<ClaimedJob>, StoreError> {
        self.inner.claim_next_job(worker).await
    }

    async fn finish_job(
        &self,
        job_id: DbId,
        token: Uuid,
        outcome: &JobOutcome,
    ) -> Result<JobFinish, StoreError> {
        self.inner.finish_job(job_id, token, outcome).await
    }

    async fn requeue_stale_jobs(&self, claimed_before: Timestamp) -> Result<Vec<DbId>, StoreError> {
        self.inner.requeue_stale_jobs(claimed_before).await
    }

    async fn fail_stalled_expansions(
        &self,
        heartbeat_before: Timestamp,
        error: &str,
        cancel_queued_children: bool,
    ) -> Result<Vec<BatchTermination>, StoreError> {
        self.inner
            .fail_stalled_expansions(heartbeat_before, error, cancel_queued_children)
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}
