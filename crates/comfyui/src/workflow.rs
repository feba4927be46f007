//! Workflow templates in ComfyUI API format.
//!
//! A workflow is a JSON object keyed by node ID, each node carrying a
//! `class_type` and an `inputs` object. Templates are read from disk per
//! render and patched with the job's prompt text and resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

/// Model used when a job names a model without a workflow.
pub const FALLBACK_MODEL: &str = "sd15";

/// Node ID of the positive prompt in the bundled templates.
const PROMPT_NODE_ID: &str = "6";
/// Node ID of the latent image in SD 1.5 style templates.
const LATENT_NODE_ID: &str = "5";

const TEXT_ENCODE_CLASS: &str = "CLIPTextEncode";
const LATENT_CLASS: &str = "EmptyLatentImage";

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Failed to read workflow {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid workflow {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Workflow has no {0} node")]
    MissingNode(&'static str),

    #[error("Workflow is not a JSON object of nodes")]
    NotAnObject,

    #[error("No workflow configured for model '{0}'")]
    UnknownModel(String),
}

/// Maps model identifiers to workflow files.
#[derive(Debug, Clone)]
pub struct WorkflowSet {
    files: HashMap<String, PathBuf>,
}

impl WorkflowSet {
    /// The standard `sd15`, `flux` and `lcm` templates under `dir`, named
    /// `workflow_<model>.json`.
    pub fn standard(dir: &Path) -> Self {
        let files = ["sd15", "flux", "lcm"]
            .into_iter()
            .map(|model| (model.to_string(), dir.join(format!("workflow_{model}.json"))))
            .collect();
        Self { files }
    }

    /// Path for `model`, falling back to [`FALLBACK_MODEL`].
    pub fn path_for(&self, model: &str) -> Option<&Path> {
        self.files
            .get(model)
            .or_else(|| self.files.get(FALLBACK_MODEL))
            .map(PathBuf::as_path)
    }

    /// Read and parse the template for `model`.
    pub async fn load(&self, model: &str) -> Result<Value, WorkflowError> {
        let path = self
            .path_for(model)
            .ok_or_else(|| WorkflowError::UnknownModel(model.to_string()))?;
        let raw = tokio::fs::read(path).await.map_err(|source| WorkflowError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| WorkflowError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Set the positive prompt text.
///
/// Targets node `6`, otherwise the first `CLIPTextEncode` node.
pub fn inject_prompt(workflow: &mut Value, prompt: &str) -> Result<(), WorkflowError> {
    let nodes = workflow.as_object_mut().ok_or(WorkflowError::NotAnObject)?;
    let node_id = if nodes.contains_key(PROMPT_NODE_ID) {
        PROMPT_NODE_ID.to_string()
    } else {
        first_of_class(nodes, TEXT_ENCODE_CLASS).ok_or(WorkflowError::MissingNode(TEXT_ENCODE_CLASS))?
    };
    set_input(nodes, &node_id, "text", Value::from(prompt))
}

/// Set the output resolution.
///
/// Targets the first `EmptyLatentImage` node, otherwise node `5`.
pub fn inject_resolution(workflow: &mut Value, width: i32, height: i32) -> Result<(), WorkflowError> {
    let nodes = workflow.as_object_mut().ok_or(WorkflowError::NotAnObject)?;
    let node_id = match first_of_class(nodes, LATENT_CLASS) {
        Some(id) => id,
        None if nodes.contains_key(LATENT_NODE_ID) => LATENT_NODE_ID.to_string(),
        None => return Err(WorkflowError::MissingNode(LATENT_CLASS)),
    };
    set_input(nodes, &node_id, "width", Value::from(width))?;
    set_input(nodes, &node_id, "height", Value::from(height))
}

fn first_of_class(nodes: &serde_json::Map<String, Value>, class: &str) -> Option<String> {
    nodes
        .iter()
        .find(|(_, node)| node.get("class_type").and_then(Value::as_str) == Some(class))
        .map(|(id, _)| id.clone())
}

fn set_input(
    nodes: &mut serde_json::Map<String, Value>,
    node_id: &str,
    key: &str,
    value: Value,
) -> Result<(), WorkflowError> {
    let node = nodes
        .get_mut(node_id)
        .and_then(Value::as_object_mut)
        .ok_or(WorkflowError::NotAnObject)?;
    let inputs = node
        .entry("inputs")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    let inputs = inputs.as_object_mut().ok_or(WorkflowError::NotAnObject)?;
    inputs.insert(key.to_string(), value);
    Ok(())
}
