//! Typed view of the ComfyUI `/history/{prompt_id}` response.
//!
//! While a prompt is pending the endpoint returns `{}`. Once it has run,
//! the response maps the prompt id to its outputs and execution status:
//!
//! ```json
//! {"<prompt_id>": {
//!     "outputs": {"30": {"images": [{"filename": "x.png", "subfolder": "", "type": "output"}]}},
//!     "status": {"status_str": "success", "completed": true, "messages": [...]}
//! }}
//! ```

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

/// The whole history response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct History(pub HashMap<String, HistoryEntry>);

impl History {
    /// The entry for `prompt_id`, if the prompt has finished.
    pub fn entry(&self, prompt_id: &str) -> Option<&HistoryEntry> {
        self.0.get(prompt_id)
    }
}

/// History of one executed prompt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: HashMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
}

/// Outputs produced by one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// Reference to an image file written by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Execution status block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionStatus {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, data]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// Status string ComfyUI records for a failed prompt.
const STATUS_ERROR: &str = "error";

impl HistoryEntry {
    /// First image produced by `node_id`.
    pub fn first_image(&self, node_id: &str) -> Option<&ImageRef> {
        self.outputs.get(node_id)?.images.first()
    }

    /// Whether the backend recorded the prompt as failed.
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.status_str == STATUS_ERROR)
    }

    /// The exception message of the first `execution_error` event, if any.
    pub fn error_message(&self) -> Option<String> {
        let status = self.status.as_ref()?;
        status.messages.iter().find_map(|m| {
            let pair = m.as_array()?;
            if pair.first()?.as_str()? != "execution_error" {
                return None;
            }
            let data = pair.get(1)?;
            let message = data.get("exception_message")?.as_str()?;
            match data.get("node_type").and_then(|t| t.as_str()) {
                Some(node_type) => Some(format!("{node_type}: {message}")),
                None => Some(message.to_string()),
            }
        })
    }
}

impl ImageRef {
    /// Path of the image relative to the backend's output directory.
    ///
    /// Returns `None` when the reported name would escape that directory
    /// (absolute paths or `..` components).
    pub fn relative_path(&self) -> Option<PathBuf> {
        let rel = if self.subfolder.is_empty() {
            PathBuf::from(&self.filename)
        } else {
            Path::new(&self.subfolder).join(&self.filename)
        };
        let safe = !self.filename.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        safe.then_some(rel)
    }
}
