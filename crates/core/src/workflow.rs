//! ComfyUI API-format workflow template and label-based node resolution.
//!
//! An API-format workflow is a JSON object keyed by node id; each node has
//! a `class_type`, an `inputs` object, and optionally `_meta.title`. The
//! template is loaded once and never mutated; each job works on its own
//! deep copy obtained from [`WorkflowTemplate::instantiate`].
//!
//! Nodes are addressed by their `_meta.title` rather than their numeric id,
//! so re-exporting the workflow from the editor (which renumbers nodes)
//! does not silently route inputs to the wrong place.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::CoreError;

/// Default title of the node receiving the head image.
pub const DEFAULT_HEAD_TITLE: &str = "HEAD_IMAGE";
/// Default title of the node receiving the body image.
pub const DEFAULT_BODY_TITLE: &str = "BODY_IMAGE";
/// Default title of the node saving the result image.
pub const DEFAULT_OUTPUT_TITLE: &str = "SAVE_OUTPUT";

/// Titles of the nodes a job mutates or reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTitles {
    pub head: String,
    pub body: String,
    pub output: String,
}

impl Default for NodeTitles {
    fn default() -> Self {
        Self {
            head: DEFAULT_HEAD_TITLE.to_string(),
            body: DEFAULT_BODY_TITLE.to_string(),
            output: DEFAULT_OUTPUT_TITLE.to_string(),
        }
    }
}

impl NodeTitles {
    pub fn all(&self) -> [&str; 3] {
        [&self.head, &self.body, &self.output]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("Node with title '{0}' not found in workflow. Check _meta.title in the workflow template.")]
    MissingNode(String),

    #[error("Title '{title}' is ambiguous: used by nodes {node_ids:?}")]
    AmbiguousTitle { title: String, node_ids: Vec<String> },

    #[error("Node '{0}' has no inputs object")]
    MissingInputs(String),
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// Read-only workflow template shared by all jobs.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    nodes: Map<String, Value>,
}

impl WorkflowTemplate {
    /// Build a template from an already-parsed JSON value.
    ///
    /// The value must be an object whose values are all objects.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        let Value::Object(nodes) = value else {
            return Err(CoreError::Validation(
                "Workflow template must be a JSON object keyed by node id".to_string(),
            ));
        };
        if let Some((id, _)) = nodes.iter().find(|(_, node)| !node.is_object()) {
            return Err(CoreError::Validation(format!(
                "Workflow node '{id}' must be a JSON object"
            )));
        }
        Ok(Self { nodes })
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Workflow template is not valid JSON: {e}")))?;
        Self::from_value(value)
    }

    pub async fn load(path: &Path) -> Result<Self, CoreError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::io(path, e))?;
        Self::from_json(&json)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Titles from `titles` that do not resolve to exactly one node.
    pub fn unresolved_titles<'a>(&self, titles: &[&'a str]) -> Vec<&'a str> {
        titles
            .iter()
            .copied()
            .filter(|t| find_node_by_title(&self.nodes, t).is_err())
            .collect()
    }

    /// Deep copy for one job.
    pub fn instantiate(&self) -> WorkflowGraph {
        WorkflowGraph {
            nodes: self.nodes.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-job graph
// ---------------------------------------------------------------------------

/// A job-owned copy of the template that may be mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowGraph {
    nodes: Map<String, Value>,
}

impl WorkflowGraph {
    pub fn find_node_by_title(&self, title: &str) -> Result<String, WorkflowError> {
        find_node_by_title(&self.nodes, title)
    }

    /// Overwrite `inputs.<field>` of `node_id`.
    pub fn set_input(&mut self, node_id: &str, field: &str, value: Value) -> Result<(), WorkflowError> {
        let inputs = self
            .nodes
            .get_mut(node_id)
            .and_then(|node| node.get_mut("inputs"))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| WorkflowError::MissingInputs(node_id.to_string()))?;
        inputs.insert(field.to_string(), value);
        Ok(())
    }

    pub fn input(&self, node_id: &str, field: &str) -> Option<&Value> {
        self.nodes.get(node_id)?.get("inputs")?.get(field)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.nodes.clone())
    }
}

/// Single linear scan for the node whose `_meta.title` equals `title`.
fn find_node_by_title(nodes: &Map<String, Value>, title: &str) -> Result<String, WorkflowError> {
    let mut matches: Vec<String> = nodes
        .iter()
        .filter(|(_, node)| {
            node.get("_meta")
                .and_then(|m| m.get("title"))
                .and_then(Value::as_str)
                == Some(title)
        })
        .map(|(id, _)| id.clone())
        .collect();

    match matches.len() {
        0 => Err(WorkflowError::MissingNode(title.to_string())),
        1 => Ok(matches.remove(0)),
        _ => Err(WorkflowError::AmbiguousTitle {
            title: title.to_string(),
            node_ids: matches,
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
