use mayagen_core::error::CoreError;
use mayagen_db::StoreError;

/// Error returned by pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Validation, not-found or conflict.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The queue store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
