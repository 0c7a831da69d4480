//! One job, end to end: validate, stage, bind, submit, poll, collect.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use headswap_comfyui::api::ComfyUIApi;
use headswap_comfyui::history::HistoryEntry;
use headswap_core::error::CoreError;
use headswap_core::job::{
    decode_image, require_field, JobInput, JobOutput, FIELD_BODY_IMAGE, FIELD_HEAD_IMAGE,
};
use headswap_core::retry::{retry_with, Retry};
use headswap_core::workflow::{WorkflowGraph, WorkflowTemplate};

use crate::config::DispatcherConfig;
use crate::error::JobError;
use crate::staging::JobContext;

/// Input field of a `LoadImage` node that holds the file name.
const IMAGE_INPUT_FIELD: &str = "image";

/// Runs jobs against one ComfyUI instance.
///
/// Cheap to clone; the template and configuration are shared read-only.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    api: ComfyUIApi,
    template: Arc<WorkflowTemplate>,
    config: Arc<DispatcherConfig>,
}

/// Node ids the job binds to, resolved from titles on the job's own copy.
struct BoundNodes {
    head: String,
    body: String,
    output: String,
}

/// What one history poll saw.
enum PollState {
    Pending,
    Ready(PathBuf),
}

impl Dispatcher {
    pub fn new(api: ComfyUIApi, template: Arc<WorkflowTemplate>, config: DispatcherConfig) -> Self {
        Self {
            api,
            template,
            config: Arc::new(config),
        }
    }

    /// Run one job. Never fails: every error becomes `{"error": ...}`.
    pub async fn handle_job(&self, input: JobInput) -> JobOutput {
        let mut ctx = JobContext::new();
        let job_id = ctx.job_id;

        match self.run(&mut ctx, &input).await {
            Ok(image) => {
                tracing::info!(
                    %job_id,
                    bytes = image.len(),
                    elapsed_ms = ctx.started.elapsed().as_millis() as u64,
                    "Job completed",
                );
                JobOutput::success(&image)
            }
            Err(e) if e.is_schema() => {
                tracing::warn!(%job_id, error = %e, "Job rejected");
                JobOutput::failure(e.to_string())
            }
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Job failed");
                JobOutput::failure(e.to_string())
            }
        }
        // `ctx` drops here and removes every staged and collected file.
    }

    async fn run(&self, ctx: &mut JobContext, input: &JobInput) -> Result<Vec<u8>, JobError> {
        let head = decode_field(&input.head_image, FIELD_HEAD_IMAGE)?;
        let body = decode_field(&input.body_image, FIELD_BODY_IMAGE)?;

        let mut graph = self.template.instantiate();
        let nodes = self.resolve_nodes(&graph)?;

        let head_name = ctx.staged_name("head");
        let body_name = ctx.staged_name("body");
        ctx.stage(&self.config.input_dir, &head_name, &head).await?;
        ctx.stage(&self.config.input_dir, &body_name, &body).await?;

        graph.set_input(&nodes.head, IMAGE_INPUT_FIELD, Value::String(head_name))?;
        graph.set_input(&nodes.body, IMAGE_INPUT_FIELD, Value::String(body_name))?;

        let prompt_id = self.submit(&graph, ctx).await?;
        tracing::info!(job_id = %ctx.job_id, %prompt_id, "Prompt queued");

        let output = self.wait_for_output(ctx, &prompt_id, &nodes.output).await?;
        tokio::fs::read(&output)
            .await
            .map_err(|e| CoreError::io(&output, e).into())
    }

    fn resolve_nodes(&self, graph: &WorkflowGraph) -> Result<BoundNodes, JobError> {
        let titles = &self.config.titles;
        Ok(BoundNodes {
            head: graph.find_node_by_title(&titles.head)?,
            body: graph.find_node_by_title(&titles.body)?,
            output: graph.find_node_by_title(&titles.output)?,
        })
    }

    async fn submit(&self, graph: &WorkflowGraph, ctx: &JobContext) -> Result<String, JobError> {
        let workflow = graph.to_value();
        let client_id = ctx.job_id.to_string();
        let policy = self.config.submit_retry;

        retry_with(
            &policy,
            "ComfyUI prompt submission",
            |_| self.api.submit_workflow(&workflow, &client_id, self.config.submit_timeout),
            |_| Retry::Yes,
        )
        .await
        .map_err(|source| JobError::Submission {
            attempts: policy.max_attempts(),
            source,
        })
    }

    /// Poll history until the output file exists on disk.
    ///
    /// Ends early with [`JobError::BackendUnavailable`] once more than
    /// `max_poll_failures` polls in a row have failed; any successful poll
    /// resets the count.
    async fn wait_for_output(
        &self,
        ctx: &mut JobContext,
        prompt_id: &str,
        output_node: &str,
    ) -> Result<PathBuf, JobError> {
        let config = &self.config;
        let deadline = Instant::now() + config.job_timeout;
        let mut consecutive_failures = 0u32;

        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(config.poll_interval.min(remaining)).await;

            let history = match self.api.get_history(prompt_id, config.poll_request_timeout).await {
                Ok(history) => {
                    consecutive_failures = 0;
                    history
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        %prompt_id,
                        consecutive_failures,
                        error = %e,
                        "History poll failed",
                    );
                    if consecutive_failures > config.max_poll_failures {
                        return Err(JobError::BackendUnavailable {
                            failures: consecutive_failures,
                            last_error: e.to_string(),
                        });
                    }
                    continue;
                }
            };

            let Some(entry) = history.entry(prompt_id) else {
                continue;
            };
            match self.inspect(ctx, entry, output_node).await? {
                PollState::Ready(path) => return Ok(path),
                PollState::Pending => {}
            }
        }

        Err(JobError::Timeout(config.job_timeout))
    }

    async fn inspect(
        &self,
        ctx: &mut JobContext,
        entry: &HistoryEntry,
        output_node: &str,
    ) -> Result<PollState, JobError> {
        if entry.is_error() {
            let message = entry
                .error_message()
                .unwrap_or_else(|| "ComfyUI reported an execution error".to_string());
            return Err(JobError::ExecutionFailed(message));
        }

        let Some(image) = entry.first_image(output_node) else {
            let completed = entry.status.as_ref().is_some_and(|s| s.completed);
            if completed {
                return Err(JobError::ExecutionFailed(format!(
                    "prompt completed without an image from node {output_node}"
                )));
            }
            return Ok(PollState::Pending);
        };

        let relative = image.relative_path().ok_or_else(|| {
            JobError::ExecutionFailed(format!("unsafe output path '{}'", image.filename))
        })?;
        let path = self.config.output_dir.join(relative);
        ctx.adopt(&path);

        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(PollState::Ready(path)),
            Ok(false) => {
                tracing::debug!(path = %path.display(), "Output listed but not yet on disk");
                Ok(PollState::Pending)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Cannot check output file, treating as pending",
                );
                Ok(PollState::Pending)
            }
        }
    }
}

fn decode_field(value: &Option<String>, field: &'static str) -> Result<Vec<u8>, JobError> {
    let raw = require_field(value, field).map_err(JobError::MissingInput)?;
    let bytes = decode_image(raw).map_err(|source| JobError::Decode { field, source })?;
    if bytes.is_empty() {
        return Err(JobError::EmptyImage(field));
    }
    Ok(bytes)
}
