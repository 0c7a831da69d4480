//! Fake ComfyUI backend and fixtures for dispatcher integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::{json, Map, Value};
use tower::ServiceExt;

use headswap_comfyui::api::ComfyUIApi;
use headswap_core::retry::RetryPolicy;
use headswap_core::workflow::WorkflowTemplate;
use headswap_worker::config::DispatcherConfig;
use headswap_worker::dispatcher::Dispatcher;

/// Node id of the output node in [`template_json`].
pub const OUTPUT_NODE: &str = "30";
/// Bytes the fake backend "renders".
pub const OUTPUT_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake swapped result";

/// A minimal API-format workflow with the three titled nodes.
pub fn template_json() -> Value {
    json!({
        "10": {"class_type": "LoadImage", "inputs": {"image": "example_head.png"}, "_meta": {"title": "HEAD_IMAGE"}},
        "11": {"class_type": "LoadImage", "inputs": {"image": "example_body.png"}, "_meta": {"title": "BODY_IMAGE"}},
        "20": {"class_type": "HeadSwap", "inputs": {"head": ["10", 0], "body": ["11", 0]}, "_meta": {"title": "Swap"}},
        "30": {"class_type": "SaveImage", "inputs": {"images": ["20", 0]}, "_meta": {"title": "SAVE_OUTPUT"}}
    })
}

pub fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// How `GET /history/{id}` answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryBehavior {
    /// Empty map forever.
    Pending,
    /// HTTP 500 forever.
    Fail,
    /// Output listed from the first poll; the file appears on disk at poll `ready_after`.
    Complete { ready_after: usize },
    /// Prompt recorded as failed.
    ExecutionError,
}

struct FakeState {
    input_dir: PathBuf,
    output_dir: PathBuf,
    behavior: HistoryBehavior,
    failing_submissions: usize,
    submit_attempts: usize,
    submissions: Vec<Value>,
    staged_inputs_present: Vec<bool>,
    history_calls: usize,
}

#[derive(Clone)]
pub struct FakeComfyUI {
    state: Arc<Mutex<FakeState>>,
}

impl FakeComfyUI {
    pub fn new(input_dir: &Path, output_dir: &Path, behavior: HistoryBehavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                input_dir: input_dir.to_path_buf(),
                output_dir: output_dir.to_path_buf(),
                behavior,
                failing_submissions: 0,
                submit_attempts: 0,
                submissions: Vec::new(),
                staged_inputs_present: Vec::new(),
                history_calls: 0,
            })),
        }
    }

    /// Answer the first `n` submissions with HTTP 500.
    pub fn failing_submissions(self, n: usize) -> Self {
        self.state.lock().unwrap().failing_submissions = n;
        self
    }

    pub async fn serve(&self) -> String {
        let app = Router::new()
            .route("/prompt", post(prompt))
            .route("/history/{prompt_id}", get(history))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    pub fn submit_attempts(&self) -> usize {
        self.state.lock().unwrap().submit_attempts
    }

    /// Graphs of accepted submissions.
    pub fn submissions(&self) -> Vec<Value> {
        self.state.lock().unwrap().submissions.clone()
    }

    /// Per accepted submission: were both referenced input files on disk?
    pub fn staged_inputs_present(&self) -> Vec<bool> {
        self.state.lock().unwrap().staged_inputs_present.clone()
    }

    pub fn history_calls(&self) -> usize {
        self.state.lock().unwrap().history_calls
    }
}

async fn prompt(State(fake): State<FakeComfyUI>, Json(body): Json<Value>) -> Response {
    let mut state = fake.state.lock().unwrap();
    state.submit_attempts += 1;
    if state.submit_attempts <= state.failing_submissions {
        return (StatusCode::INTERNAL_SERVER_ERROR, "queue unavailable").into_response();
    }

    let graph = body["prompt"].clone();
    let present = ["10", "11"].iter().all(|id| {
        graph[*id]["inputs"]["image"]
            .as_str()
            .is_some_and(|name| state.input_dir.join(name).exists())
    });
    state.staged_inputs_present.push(present);
    state.submissions.push(graph);

    let number = state.submissions.len();
    Json(json!({
        "prompt_id": format!("prompt-{number}"),
        "number": number,
        "node_errors": {}
    }))
    .into_response()
}

async fn history(State(fake): State<FakeComfyUI>, UrlPath(prompt_id): UrlPath<String>) -> Response {
    let mut state = fake.state.lock().unwrap();
    state.history_calls += 1;
    let calls = state.history_calls;

    let entry = match state.behavior {
        HistoryBehavior::Pending => return Json(json!({})).into_response(),
        HistoryBehavior::Fail => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "server error").into_response();
        }
        HistoryBehavior::ExecutionError => json!({
            "outputs": {},
            "status": {
                "status_str": "error",
                "completed": false,
                "messages": [
                    ["execution_start", {"prompt_id": prompt_id.clone()}],
                    ["execution_error", {"node_type": "KSampler", "exception_message": "CUDA out of memory"}]
                ]
            }
        }),
        HistoryBehavior::Complete { ready_after } => {
            let filename = format!("{prompt_id}_00001_.png");
            let ready = calls >= ready_after;
            if ready {
                std::fs::create_dir_all(&state.output_dir).unwrap();
                std::fs::write(state.output_dir.join(&filename), OUTPUT_BYTES).unwrap();
            }
            let mut outputs = Map::new();
            outputs.insert(
                OUTPUT_NODE.to_string(),
                json!({"images": [{"filename": filename, "subfolder": "", "type": "output"}]}),
            );
            json!({
                "outputs": outputs,
                "status": {"status_str": "success", "completed": ready, "messages": []}
            })
        }
    };

    let mut map = Map::new();
    map.insert(prompt_id, entry);
    Json(Value::Object(map)).into_response()
}

/// Dispatcher config with millisecond-scale timings.
pub fn fast_config(url: &str, input_dir: &Path, output_dir: &Path) -> DispatcherConfig {
    let mut config = DispatcherConfig::new(url, input_dir, output_dir);
    config.submit_retry = RetryPolicy::new(3, Duration::from_millis(10));
    config.submit_timeout = Duration::from_secs(2);
    config.poll_interval = Duration::from_millis(20);
    config.poll_request_timeout = Duration::from_secs(1);
    config.job_timeout = Duration::from_secs(5);
    config
}

pub fn dispatcher(config: DispatcherConfig, template: Value) -> Dispatcher {
    let template = WorkflowTemplate::from_value(template).unwrap();
    let api = ComfyUIApi::new(config.comfyui_url.clone());
    Dispatcher::new(api, Arc::new(template), config)
}

/// Number of entries in `dir` (0 if it does not exist).
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Send a request through the router and parse the JSON response.
pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, json)
}
