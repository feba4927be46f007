//! The image generation capability the worker calls for every job.
//!
//! Implementations are handed to the executor explicitly and keep no
//! per-job state between calls, so several workers can share one handle.

use std::time::Duration;

use async_trait::async_trait;

/// Everything a provider needs to render one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub prompt: String,
    pub width: i32,
    pub height: i32,
    /// Model identifier; providers map it to their own workflow or weights.
    pub model: String,
}

/// Errors surfaced by a generation provider. All of them fail the job.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The backend could not be reached.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// The backend refused or failed the request.
    #[error("Generation failed: {0}")]
    Rejected(String),

    /// The call did not finish within the configured timeout.
    #[error("Generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The backend answered with something we could not interpret.
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// No provider is registered under the job's provider identifier.
    #[error("Unsupported provider '{0}'")]
    Unsupported(String),

    /// Local I/O failed (reading a workflow, writing the image).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Renders one image per call.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Render `request` and return the encoded image bytes.
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, ProviderError>;
}
