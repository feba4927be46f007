//! Persistence for the image job queue.
//!
//! Row models and status enums live in [`models`], raw Postgres access in
//! [`repositories`]. Everything above this crate talks to the queue
//! through the [`store::QueueStore`] trait, implemented by
//! [`store::PgQueueStore`] for production and [`memory::MemoryQueueStore`]
//! for tests and single-process runs.

pub mod error;
pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub use error::StoreError;
pub use memory::MemoryQueueStore;
pub use store::{PgQueueStore, QueueStore};

pub type DbPool = sqlx::PgPool;

/// Maximum pooled connections per process.
const MAX_CONNECTIONS: u32 = 10;

/// How long to wait for a free connection before reporting the store as
/// unavailable.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
}

/// Run a trivial query to confirm the database answers.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded SQL migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
