//! The mayagen background worker.
//!
//! [`scheduler::Scheduler`] drives all progress on the queue: it expands
//! queued batches through [`expander::BatchExpander`] and runs claimed
//! jobs through [`executor::JobExecutor`]. [`reaper::StaleClaimReaper`]
//! fails batch expansions abandoned by crashed workers and, when a stale
//! timeout is configured, requeues their jobs.

pub mod config;
pub mod executor;
pub mod expander;
pub mod providers;
pub mod reaper;
pub mod scheduler;

use std::sync::Arc;

use mayagen_db::QueueStore;

use config::WorkerConfig;
use executor::JobExecutor;
use expander::BatchExpander;
use providers::ProviderRegistry;
use scheduler::{Scheduler, SchedulerTiming};

/// Assemble a scheduler from configuration.
pub fn build_scheduler(
    store: Arc<dyn QueueStore>,
    providers: ProviderRegistry,
    config: &WorkerConfig,
) -> Scheduler {
    let expander = BatchExpander::new(
        Arc::clone(&store),
        config.expansion_chunk_size,
        config.orphan_policy,
    );
    let executor = JobExecutor::new(providers, config.output_dir.clone(), config.provider_timeout);
    Scheduler::new(
        store,
        expander,
        executor,
        config.worker_name.clone(),
        SchedulerTiming {
            idle_delay: config.idle_delay,
            error_backoff: config.error_backoff,
        },
    )
}
