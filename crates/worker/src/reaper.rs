//! Recovering work abandoned by crashed workers.
//!
//! Two kinds of claim can be left behind:
//!
//! - A job claim older than the stale timeout. The job returns to the
//!   queue with its claim cleared, and a late result from the original
//!   worker is rejected because its token no longer matches. The timeout
//!   must exceed the provider timeout so a live worker is never reaped.
//!   Only swept when a stale timeout is configured.
//! - A batch expansion whose heartbeat stopped before every child was
//!   created. Such a batch can never complete on its own, so it is failed
//!   and its existing children are handled per the orphan policy. Always
//!   swept.

use std::sync::Arc;
use std::time::Duration;

use mayagen_core::types::DbId;
use mayagen_db::{QueueStore, StoreError};
use tokio_util::sync::CancellationToken;

use crate::config::{OrphanPolicy, WorkerConfig};

/// Error recorded on batches failed by the reaper.
pub const STALLED_EXPANSION_ERROR: &str = "Batch expansion was abandoned before all jobs were created";

#[derive(Debug, Clone, Copy)]
pub struct ReaperSettings {
    /// Job claims older than this are requeued. `None` leaves jobs alone.
    pub stale_claim_timeout: Option<Duration>,
    pub expansion_lease: Duration,
    pub orphan_policy: OrphanPolicy,
    pub interval: Duration,
}

impl ReaperSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            stale_claim_timeout: config.stale_claim_timeout,
            expansion_lease: config.expansion_lease,
            orphan_policy: config.orphan_policy,
            interval: config.reaper_interval,
        }
    }
}

/// What one sweep recovered.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Sweep {
    pub requeued_jobs: Vec<DbId>,
    pub failed_batches: Vec<DbId>,
}

pub struct StaleClaimReaper {
    store: Arc<dyn QueueStore>,
    settings: ReaperSettings,
}

impl StaleClaimReaper {
    pub fn new(store: Arc<dyn QueueStore>, settings: ReaperSettings) -> Self {
        Self { store, settings }
    }

    /// Run until `cancel` fires, sweeping every `interval`.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        tracing::info!(
            stale_after_secs = ?self.settings.stale_claim_timeout.map(|d| d.as_secs()),
            expansion_lease_secs = self.settings.expansion_lease.as_secs(),
            interval_secs = self.settings.interval.as_secs(),
            "Stale claim reaper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Stale claim reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.reap_once().await {
                        tracing::error!(error = %e, "Stale claim sweep failed");
                    }
                }
            }
        }
    }

    /// One sweep over stalled expansions and, if enabled, stale job claims.
    pub async fn reap_once(&self) -> Result<Sweep, StoreError> {
        let now = chrono::Utc::now();

        let failed = self
            .store
            .fail_stalled_expansions(
                now - to_chrono(self.settings.expansion_lease)?,
                STALLED_EXPANSION_ERROR,
                self.settings.orphan_policy.cancels_children(),
            )
            .await?;
        for termination in &failed {
            tracing::warn!(
                batch_id = termination.batch.id,
                total_images = termination.batch.total_images,
                cancelled_jobs = termination.cancelled_jobs,
                orphan_policy = ?self.settings.orphan_policy,
                "Failed batch with stalled expansion",
            );
        }

        let requeued_jobs = match self.settings.stale_claim_timeout {
            Some(stale_after) => {
                self.store
                    .requeue_stale_jobs(now - to_chrono(stale_after)?)
                    .await?
            }
            None => Vec::new(),
        };
        if !requeued_jobs.is_empty() {
            tracing::warn!(
                count = requeued_jobs.len(),
                job_ids = ?requeued_jobs,
                "Requeued jobs with stale claims",
            );
        }

        Ok(Sweep {
            requeued_jobs,
            failed_batches: failed.iter().map(|t| t.batch.id).collect(),
        })
    }
}

fn to_chrono(duration: Duration) -> Result<chrono::Duration, StoreError> {
    chrono::Duration::from_std(duration)
        .map_err(|e| StoreError::Corrupt(format!("reaper timeout out of range: {e}")))
}
