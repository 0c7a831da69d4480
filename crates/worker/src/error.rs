use std::time::Duration;

use headswap_comfyui::api::ComfyUIApiError;
use headswap_core::error::CoreError;
use headswap_core::workflow::WorkflowError;

/// Why a job did not produce an image.
///
/// The `Display` text is what the caller sees in `{"error": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A required job input is absent or blank.
    #[error("Missing required input '{0}'")]
    MissingInput(&'static str),

    /// A job input is not valid base64.
    #[error("Failed to decode base64 image in '{field}': {source}")]
    Decode {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    /// A job input decoded to zero bytes.
    #[error("Input '{0}' decoded to an empty image")]
    EmptyImage(&'static str),

    /// The template lacks a node the job needs.
    #[error("Workflow metadata error: {0}")]
    Workflow(#[from] WorkflowError),

    /// No prompt id after exhausting the submission attempts.
    #[error("Failed to queue prompt after {attempts} attempts: {source}")]
    Submission {
        attempts: u32,
        #[source]
        source: ComfyUIApiError,
    },

    /// History polling kept failing; the backend has most likely crashed.
    #[error("CRITICAL: ComfyUI crashed or is unresponsive after {failures} consecutive failed polls (last error: {last_error}). Check server RAM/VRAM.")]
    BackendUnavailable { failures: u32, last_error: String },

    /// The deadline passed without an output image.
    #[error("Timeout: generation exceeded {} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    /// ComfyUI finished the prompt without a usable result.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Staging or reading a file failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl JobError {
    /// Errors caused by the request or the template rather than the backend.
    /// These are never retried and never reach ComfyUI.
    pub fn is_schema(&self) -> bool {
        matches!(
            self,
            Self::MissingInput(_) | Self::Decode { .. } | Self::EmptyImage(_) | Self::Workflow(_)
        )
    }
}
