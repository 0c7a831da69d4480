use std::path::PathBuf;
use std::time::Duration;

use headswap_core::config::{env_flag, env_millis, env_or, env_secs, env_string};
use headswap_core::error::CoreError;
use headswap_core::retry::RetryPolicy;
use headswap_core::workflow::{
    NodeTitles, DEFAULT_BODY_TITLE, DEFAULT_HEAD_TITLE, DEFAULT_OUTPUT_TITLE,
};

/// How jobs talk to ComfyUI and where they stage files.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Base HTTP URL of the ComfyUI instance.
    pub comfyui_url: String,
    /// API-format workflow template, loaded once at startup.
    pub workflow_path: PathBuf,
    /// ComfyUI's input directory; staged job images are written here.
    pub input_dir: PathBuf,
    /// ComfyUI's output directory; result images are read from here.
    pub output_dir: PathBuf,
    /// `_meta.title` of the head, body, and output nodes.
    pub titles: NodeTitles,
    /// Submission attempts and the pause between them.
    pub submit_retry: RetryPolicy,
    /// Per-request timeout of `POST /prompt`.
    pub submit_timeout: Duration,
    /// Pause before each history poll.
    pub poll_interval: Duration,
    /// Per-request timeout of `GET /history/{id}`.
    pub poll_request_timeout: Duration,
    /// Wall-clock budget from submission to result.
    pub job_timeout: Duration,
    /// Consecutive failed polls tolerated before the backend is declared down.
    pub max_poll_failures: u32,
}

impl DispatcherConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                  |
    /// |------------------------------|--------------------------|
    /// | `COMFYUI_URL`                | `http://127.0.0.1:8188`  |
    /// | `WORKFLOW_PATH`              | `workflow_api.json`      |
    /// | `COMFYUI_INPUT_DIR`          | `/ComfyUI/input`         |
    /// | `COMFYUI_OUTPUT_DIR`         | `/ComfyUI/output`        |
    /// | `HEAD_NODE_TITLE`            | `HEAD_IMAGE`             |
    /// | `BODY_NODE_TITLE`            | `BODY_IMAGE`             |
    /// | `OUTPUT_NODE_TITLE`          | `SAVE_OUTPUT`            |
    /// | `SUBMIT_ATTEMPTS`            | `3`                      |
    /// | `SUBMIT_BACKOFF_SECS`        | `2`                      |
    /// | `SUBMIT_TIMEOUT_SECS`        | `10`                     |
    /// | `POLL_INTERVAL_MS`           | `2000`                   |
    /// | `POLL_REQUEST_TIMEOUT_SECS`  | `5`                      |
    /// | `JOB_TIMEOUT_SECS`           | `400`                    |
    /// | `MAX_POLL_FAILURES`          | `5`                      |
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self {
            comfyui_url: env_string("COMFYUI_URL", "http://127.0.0.1:8188"),
            workflow_path: PathBuf::from(env_string("WORKFLOW_PATH", "workflow_api.json")),
            input_dir: PathBuf::from(env_string("COMFYUI_INPUT_DIR", "/ComfyUI/input")),
            output_dir: PathBuf::from(env_string("COMFYUI_OUTPUT_DIR", "/ComfyUI/output")),
            titles: NodeTitles {
                head: env_string("HEAD_NODE_TITLE", DEFAULT_HEAD_TITLE),
                body: env_string("BODY_NODE_TITLE", DEFAULT_BODY_TITLE),
                output: env_string("OUTPUT_NODE_TITLE", DEFAULT_OUTPUT_TITLE),
            },
            submit_retry: RetryPolicy::new(
                env_or("SUBMIT_ATTEMPTS", 3)?,
                env_secs("SUBMIT_BACKOFF_SECS", 2)?,
            ),
            submit_timeout: env_secs("SUBMIT_TIMEOUT_SECS", 10)?,
            poll_interval: env_millis("POLL_INTERVAL_MS", 2000)?,
            poll_request_timeout: env_secs("POLL_REQUEST_TIMEOUT_SECS", 5)?,
            job_timeout: env_secs("JOB_TIMEOUT_SECS", 400)?,
            max_poll_failures: env_or("MAX_POLL_FAILURES", 5)?,
        })
    }

    /// Defaults pointing at the given ComfyUI URL and staging directories.
    pub fn new(
        comfyui_url: impl Into<String>,
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            comfyui_url: comfyui_url.into(),
            workflow_path: PathBuf::from("workflow_api.json"),
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            titles: NodeTitles::default(),
            submit_retry: RetryPolicy::new(3, Duration::from_secs(2)),
            submit_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            poll_request_timeout: Duration::from_secs(5),
            job_timeout: Duration::from_secs(400),
            max_poll_failures: 5,
        }
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Jobs executed at once; further `/run` requests wait (default: `1`).
    pub max_concurrent_jobs: usize,
    /// Start serving without running the artifact provisioner first.
    pub skip_provisioning: bool,
}

impl ServerConfig {
    /// | Env Var                | Default   |
    /// |------------------------|-----------|
    /// | `HOST`                 | `0.0.0.0` |
    /// | `PORT`                 | `8000`    |
    /// | `MAX_CONCURRENT_JOBS`  | `1`       |
    /// | `SKIP_PROVISIONING`    | `false`   |
    pub fn from_env() -> Result<Self, CoreError> {
        let max_concurrent_jobs: usize = env_or("MAX_CONCURRENT_JOBS", 1)?;
        if max_concurrent_jobs == 0 {
            return Err(CoreError::Config(
                "MAX_CONCURRENT_JOBS must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            host: env_string("HOST", "0.0.0.0"),
            port: env_or("PORT", 8000)?,
            max_concurrent_jobs,
            skip_provisioning: env_flag("SKIP_PROVISIONING", false)?,
        })
    }
}
