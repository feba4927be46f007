//! [`GenerationProvider`] backed by a ComfyUI server.
//!
//! Each render opens its own WebSocket under a fresh client ID, so one
//! provider handle can be shared by any number of concurrent workers.

use std::path::Path;

use async_trait::async_trait;
use mayagen_core::provider::{GenerationProvider, ProviderError, RenderRequest};

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::{ComfyUIClient, ComfyUIClientError};
use crate::processor::wait_for_prompt;
use crate::workflow::{inject_prompt, inject_resolution, WorkflowError, WorkflowSet};

pub struct ComfyUIProvider {
    api: ComfyUIApi,
    client: ComfyUIClient,
    workflows: WorkflowSet,
}

impl ComfyUIProvider {
    /// * `api_url`       - HTTP base URL, e.g. `http://127.0.0.1:8188`.
    /// * `workflows_dir` - directory holding `workflow_<model>.json` files.
    pub fn new(api_url: &str, workflows_dir: &Path) -> Self {
        Self {
            api: ComfyUIApi::new(api_url.to_string()),
            client: ComfyUIClient::from_api_url(api_url),
            workflows: WorkflowSet::standard(workflows_dir),
        }
    }
}

#[async_trait]
impl GenerationProvider for ComfyUIProvider {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, ProviderError> {
        let mut workflow = self.workflows.load(&request.model).await?;
        inject_prompt(&mut workflow, &request.prompt)?;
        inject_resolution(&mut workflow, request.width, request.height)?;

        // Register the socket before submitting so the completion message
        // cannot be missed.
        let mut connection = self.client.connect().await?;
        let submitted = self
            .api
            .submit_workflow(&workflow, &connection.client_id)
            .await?;
        tracing::debug!(
            prompt_id = %submitted.prompt_id,
            queue_position = submitted.number,
            model = %request.model,
            "Workflow queued on ComfyUI",
        );

        let waited = wait_for_prompt(&mut connection.ws_stream, &submitted.prompt_id).await;
        if let Err(e) = connection.ws_stream.close(None).await {
            tracing::debug!(error = %e, "Failed to close ComfyUI WebSocket");
        }
        waited?;

        let history = self.api.get_history(&submitted.prompt_id).await?;
        let image = history.first_image().ok_or_else(|| {
            ProviderError::MalformedResponse("No image found in output".to_string())
        })?;
        Ok(self.api.view_image(image).await?)
    }
}

impl From<WorkflowError> for ProviderError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Read { source, .. } => ProviderError::Io(source),
            other => ProviderError::Rejected(other.to_string()),
        }
    }
}

impl From<ComfyUIClientError> for ProviderError {
    fn from(err: ComfyUIClientError) -> Self {
        match err {
            ComfyUIClientError::Connection(msg) => ProviderError::Unavailable(msg),
            ComfyUIClientError::Protocol(msg) => ProviderError::MalformedResponse(msg),
            ComfyUIClientError::Execution { .. } => ProviderError::Rejected(err.to_string()),
        }
    }
}

impl From<ComfyUIApiError> for ProviderError {
    fn from(err: ComfyUIApiError) -> Self {
        match err {
            ComfyUIApiError::Request(ref e) if e.is_connect() || e.is_timeout() => {
                ProviderError::Unavailable(err.to_string())
            }
            ComfyUIApiError::Request(ref e) if e.is_decode() => {
                ProviderError::MalformedResponse(err.to_string())
            }
            ComfyUIApiError::MissingHistory(_) => ProviderError::MalformedResponse(err.to_string()),
            _ => ProviderError::Rejected(err.to_string()),
        }
    }
}
