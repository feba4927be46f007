use std::net::SocketAddr;
use std::sync::Arc;

use mayagen_api::config::ServerConfig;
use mayagen_api::router::build_app_router;
use mayagen_api::state::AppState;
use mayagen_db::{MemoryQueueStore, PgQueueStore, QueueStore};
use mayagen_worker::config::{QueueBackend, WorkerConfig};
use mayagen_worker::providers::ProviderRegistry;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let config = ServerConfig::from_env().unwrap_or_else(|e| fail("Invalid server configuration", e));
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Queue ---
    let cancel = CancellationToken::new();
    let mut background = tokio::task::JoinSet::new();

    let store: Arc<dyn QueueStore> = match &config.queue {
        QueueBackend::Postgres { database_url } => {
            let pool = mayagen_db::create_pool(database_url)
                .await
                .unwrap_or_else(|e| fail("Failed to connect to database", e));
            mayagen_db::health_check(&pool)
                .await
                .unwrap_or_else(|e| fail("Database health check failed", e));
            mayagen_db::run_migrations(&pool)
                .await
                .unwrap_or_else(|e| fail("Failed to run database migrations", e));
            tracing::info!("Database ready");
            Arc::new(PgQueueStore::new(pool))
        }
        QueueBackend::Memory => {
            let store: Arc<dyn QueueStore> = Arc::new(MemoryQueueStore::new());
            let worker_config =
                WorkerConfig::from_env().unwrap_or_else(|e| fail("Invalid worker configuration", e));
            let providers = ProviderRegistry::from_config(&worker_config);
            let scheduler =
                mayagen_worker::build_scheduler(Arc::clone(&store), providers, &worker_config);
            let token = cancel.clone();
            background.spawn(async move { scheduler.run(token).await });
            tracing::warn!("Using in-memory queue with an embedded worker; jobs are lost on restart");
            store
        }
    };

    // --- Router ---
    let state = AppState {
        store,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let host = config
        .host
        .parse()
        .unwrap_or_else(|e| fail("Invalid HOST address", e));
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| fail("Failed to bind to address", e));

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    // --- Post-shutdown cleanup ---
    cancel.cancel();
    while let Some(result) = background.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Background task panicked");
        }
    }
    tracing::info!("Graceful shutdown complete");
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mayagen_api=debug,mayagen_worker=debug,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Log a fatal startup error and exit.
fn fail<E: std::fmt::Display>(message: &str, error: E) -> ! {
    tracing::error!(error = %error, "{message}");
    std::process::exit(1);
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
