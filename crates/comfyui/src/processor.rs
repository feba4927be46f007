//! Waiting on a submitted prompt over its WebSocket.
//!
//! Reads frames until ComfyUI reports that the prompt finished (an
//! `executing` message with a null node) or failed. Messages for other
//! prompts, previews and unknown kinds are skipped.

use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use crate::client::{ComfyUIClientError, ComfyUIStream};
use crate::messages::{parse_message, ComfyUIMessage};

/// What a single message means for the prompt being awaited.
#[derive(Debug, PartialEq, Eq)]
pub enum PromptStep {
    /// Keep reading.
    Pending,
    /// Outputs are ready in the history.
    Finished,
    /// The prompt failed on the server.
    Failed { node_id: String, message: String },
}

/// Classify one parsed message relative to `prompt_id`.
pub fn classify(message: &ComfyUIMessage, prompt_id: &str) -> PromptStep {
    if message.prompt_id() != Some(prompt_id) {
        return PromptStep::Pending;
    }
    match message {
        ComfyUIMessage::Executing(data) if data.node.is_none() => PromptStep::Finished,
        ComfyUIMessage::ExecutionError(data) => PromptStep::Failed {
            node_id: data.node_id.clone(),
            message: if data.exception_type.is_empty() {
                data.exception_message.clone()
            } else {
                format!("{}: {}", data.exception_type, data.exception_message)
            },
        },
        ComfyUIMessage::ExecutionInterrupted(data) => PromptStep::Failed {
            node_id: data.node_id.clone().unwrap_or_default(),
            message: "execution interrupted".to_string(),
        },
        ComfyUIMessage::Progress(data) => {
            tracing::trace!(prompt_id, value = data.value, max = data.max, "Generation progress");
            PromptStep::Pending
        }
        _ => PromptStep::Pending,
    }
}

/// Read frames until `prompt_id` finishes or fails.
pub async fn wait_for_prompt(
    ws_stream: &mut ComfyUIStream,
    prompt_id: &str,
) -> Result<(), ComfyUIClientError> {
    while let Some(frame) = ws_stream.next().await {
        let frame = frame.map_err(|e| ComfyUIClientError::Protocol(e.to_string()))?;
        let text = match frame {
            Message::Text(text) => text,
            Message::Binary(_) => {
                tracing::trace!(prompt_id, "Ignoring binary preview frame");
                continue;
            }
            Message::Close(frame) => {
                return Err(ComfyUIClientError::Protocol(format!(
                    "WebSocket closed before prompt finished: {frame:?}"
                )));
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        let message = match parse_message(&text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(prompt_id, error = %e, "Skipping unrecognised ComfyUI message");
                continue;
            }
        };

        match classify(&message, prompt_id) {
            PromptStep::Pending => {}
            PromptStep::Finished => return Ok(()),
            PromptStep::Failed { node_id, message } => {
                return Err(ComfyUIClientError::Execution { node_id, message });
            }
        }
    }
    Err(ComfyUIClientError::Protocol(
        "WebSocket stream ended before prompt finished".to_string(),
    ))
}
