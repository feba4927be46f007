mod common;

use std::sync::Arc;
use std::time::Duration;

use mayagen_db::models::job::{JobOutcome, NewBatchChild};
use mayagen_db::models::status::{BatchJobStatus, JobStatus};
use mayagen_db::{MemoryQueueStore, QueueStore};
use mayagen_worker::config::OrphanPolicy;
use mayagen_worker::reaper::{ReaperSettings, StaleClaimReaper, STALLED_EXPANSION_ERROR};
use mayagen_worker::scheduler::Tick;
use tokio_util::sync::CancellationToken;

use common::{new_batch, new_job, scheduler, ScriptedProvider};

const HOUR: Duration = Duration::from_secs(3600);

fn settings(stale_claim_timeout: Option<Duration>, expansion_lease: Duration) -> ReaperSettings {
    ReaperSettings {
        stale_claim_timeout,
        expansion_lease,
        orphan_policy: OrphanPolicy::Run,
        interval: Duration::from_secs(60),
    }
}

fn children(n: usize) -> Vec<NewBatchChild> {
    (0..n)
        .map(|i| NewBatchChild {
            prompt: format!("cat {i}"),
            filename: format!("child_{i}.png"),
        })
        .collect()
}

#[tokio::test]
async fn stale_claims_are_requeued_and_late_results_rejected() {
    let store = Arc::new(MemoryQueueStore::new());
    let job = store.insert_job(&new_job("a cat")).await.unwrap();
    let claimed = store.claim_next_job("crashed").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let reaper = StaleClaimReaper::new(store.clone(), settings(Some(Duration::ZERO), HOUR));
    let sweep = reaper.reap_once().await.unwrap();
    assert_eq!(sweep.requeued_jobs, vec![job.id]);
    assert!(sweep.failed_batches.is_empty());

    let requeued = store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(requeued.status(), Some(JobStatus::Queued));
    assert!(requeued.claimed_by.is_none());

    let late = store
        .finish_job(
            job.id,
            claimed.token,
            &JobOutcome::Completed {
                output_path: "/tmp/late.png".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(!late.recorded);
    let unchanged = store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status(), Some(JobStatus::Queued));
    assert!(unchanged.output_path.is_none());
}

#[tokio::test]
async fn fresh_claims_are_left_alone() {
    let store = Arc::new(MemoryQueueStore::new());
    store.insert_job(&new_job("a cat")).await.unwrap();
    store.claim_next_job("alive").await.unwrap().unwrap();

    let reaper = StaleClaimReaper::new(store.clone(), settings(Some(HOUR), HOUR));
    assert!(reaper.reap_once().await.unwrap().requeued_jobs.is_empty());
}

#[tokio::test]
async fn job_claims_are_kept_without_a_stale_timeout() {
    let store = Arc::new(MemoryQueueStore::new());
    let job = store.insert_job(&new_job("a cat")).await.unwrap();
    store.claim_next_job("slow").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let reaper = StaleClaimReaper::new(store.clone(), settings(None, Duration::ZERO));
    assert!(reaper.reap_once().await.unwrap().requeued_jobs.is_empty());
    let job = store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status(), Some(JobStatus::Processing));
}

#[tokio::test]
async fn abandoned_expansion_fails_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryQueueStore::new());
    store
        .insert_batch(&new_batch(5, &[("color", &["red", "blue"])]))
        .await
        .unwrap();

    // A worker claims the batch, creates two children, then dies.
    let batch = store.claim_next_batch().await.unwrap().unwrap();
    store.insert_batch_children(&batch, &children(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Nothing else will pick the batch up again.
    let sched = scheduler(store.clone(), ScriptedProvider::new(vec![]), dir.path(), "w2");
    for _ in 0..2 {
        sched.run_once().await.unwrap();
    }
    assert_eq!(sched.run_once().await.unwrap(), Tick::Idle);
    let stuck = store.find_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(stuck.status(), Some(BatchJobStatus::Generating));

    let reaper = StaleClaimReaper::new(store.clone(), settings(None, Duration::ZERO));
    let sweep = reaper.reap_once().await.unwrap();
    assert_eq!(sweep.failed_batches, vec![batch.id]);

    let failed = store.find_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(failed.status(), Some(BatchJobStatus::Failed));
    assert_eq!(failed.error_message.as_deref(), Some(STALLED_EXPANSION_ERROR));

    // A late chunk from the dead worker is refused.
    let late = store.insert_batch_children(&batch, &children(3)).await.unwrap();
    assert_eq!(late, None);
    assert_eq!(store.list_batch_jobs(batch.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn abandoned_expansion_cancels_children_when_configured() {
    let store = Arc::new(MemoryQueueStore::new());
    store
        .insert_batch(&new_batch(5, &[("color", &["red", "blue"])]))
        .await
        .unwrap();
    let batch = store.claim_next_batch().await.unwrap().unwrap();
    store.insert_batch_children(&batch, &children(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let reaper = StaleClaimReaper::new(
        store.clone(),
        ReaperSettings {
            orphan_policy: OrphanPolicy::Cancel,
            ..settings(None, Duration::ZERO)
        },
    );
    assert_eq!(reaper.reap_once().await.unwrap().failed_batches, vec![batch.id]);

    let children = store.list_batch_jobs(batch.id).await.unwrap();
    assert!(children
        .iter()
        .all(|j| j.status() == Some(JobStatus::Cancelled)));
}

#[tokio::test]
async fn live_and_finished_expansions_are_left_alone() {
    let store = Arc::new(MemoryQueueStore::new());
    store
        .insert_batch(&new_batch(2, &[("color", &["red", "blue"])]))
        .await
        .unwrap();
    store
        .insert_batch(&new_batch(5, &[("color", &["red", "blue"])]))
        .await
        .unwrap();
    let expanded = store.claim_next_batch().await.unwrap().unwrap();
    store.insert_batch_children(&expanded, &children(2)).await.unwrap();
    let in_progress = store.claim_next_batch().await.unwrap().unwrap();
    store.insert_batch_children(&in_progress, &children(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    // The in-progress batch heartbeats within its lease.
    let reaper = StaleClaimReaper::new(store.clone(), settings(None, HOUR));
    assert!(reaper.reap_once().await.unwrap().failed_batches.is_empty());

    // With every child created, a batch is never reaped however old it is.
    let reaper = StaleClaimReaper::new(store.clone(), settings(None, Duration::ZERO));
    assert_eq!(reaper.reap_once().await.unwrap().failed_batches, vec![in_progress.id]);
    let expanded = store.find_batch(expanded.id).await.unwrap().unwrap();
    assert_eq!(expanded.status(), Some(BatchJobStatus::Generating));
}

#[tokio::test]
async fn run_sweeps_until_cancelled() {
    let store = Arc::new(MemoryQueueStore::new());
    let job = store.insert_job(&new_job("a cat")).await.unwrap();
    store.claim_next_job("crashed").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let reaper = StaleClaimReaper::new(
        store.clone(),
        ReaperSettings {
            interval: Duration::from_millis(10),
            ..settings(Some(Duration::ZERO), HOUR)
        },
    );
    let cancel = CancellationToken::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { reaper.run(cancel).await })
    };

    let mut requeued = false;
    for _ in 0..100 {
        let current = store.find_job(job.id).await.unwrap().unwrap();
        if current.status() == Some(JobStatus::Queued) {
            requeued = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(requeued);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("reaper should stop after cancellation")
        .unwrap();
}
