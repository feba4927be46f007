//! `mayagen-worker` -- background process that expands batches and renders
//! queued jobs.
//!
//! Configuration is read from the environment (see [`mayagen_worker::config`]).
//! Any number of workers may run against the same Postgres queue. Stops on
//! Ctrl-C after the job in flight has been recorded.

use std::sync::Arc;

use mayagen_db::{MemoryQueueStore, PgQueueStore, QueueStore};
use mayagen_worker::config::{QueueBackend, WorkerConfig};
use mayagen_worker::providers::ProviderRegistry;
use mayagen_worker::reaper::{ReaperSettings, StaleClaimReaper};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid worker configuration");
        std::process::exit(1);
    });

    let store: Arc<dyn QueueStore> = match &config.queue {
        QueueBackend::Postgres { database_url } => {
            let pool = mayagen_db::create_pool(database_url).await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to connect to database");
                std::process::exit(1);
            });
            if let Err(e) = mayagen_db::run_migrations(&pool).await {
                tracing::error!(error = %e, "Failed to run database migrations");
                std::process::exit(1);
            }
            tracing::info!("Database ready");
            Arc::new(PgQueueStore::new(pool))
        }
        QueueBackend::Memory => {
            tracing::warn!("Using in-memory queue; only jobs enqueued by this process are visible");
            Arc::new(MemoryQueueStore::new())
        }
    };

    let providers = ProviderRegistry::from_config(&config);
    tracing::info!(
        worker = %config.worker_name,
        providers = ?providers.names(),
        output_dir = %config.output_dir.display(),
        provider_timeout_secs = config.provider_timeout.as_secs(),
        orphan_policy = ?config.orphan_policy,
        "Starting mayagen-worker",
    );

    let cancel = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();

    let reaper = StaleClaimReaper::new(Arc::clone(&store), ReaperSettings::from_config(&config));
    let token = cancel.clone();
    tasks.spawn(async move { reaper.run(token).await });

    let scheduler = mayagen_worker::build_scheduler(store, providers, &config);
    let token = cancel.clone();
    tasks.spawn(async move { scheduler.run(token).await });

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
    cancel.cancel();

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }
    tracing::info!("mayagen-worker stopped");
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mayagen_worker=debug,mayagen_comfyui=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
