/// Failures of the queue store itself, as opposed to failures of a job.
///
/// The worker treats every variant as transient: it logs, backs off and
/// tries again.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Inconsistent store state: {0}")]
    Corrupt(String),
}
