//! Fake artifact source for provisioning integration tests.
//!
//! Serves named byte blobs over HTTP with `Range` support, records every
//! request, and can cut the first N responses of a file halfway through
//! the body to simulate an interrupted transfer.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path as UrlPath, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;

use headswap_provision::ProvisionConfig;

/// Behaviour of one served file.
#[derive(Clone, Default)]
pub struct FakeFile {
    pub body: Vec<u8>,
    /// Number of initial requests whose body is cut halfway.
    pub interrupt_first: usize,
    /// Answer range requests with the full body and `200 OK`.
    pub ignore_range: bool,
}

#[derive(Clone, Default)]
pub struct FakeSource {
    files: Arc<HashMap<String, FakeFile>>,
    hits: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl FakeSource {
    pub fn new(files: Vec<(&str, FakeFile)>) -> Self {
        Self {
            files: Arc::new(files.into_iter().map(|(n, f)| (n.to_string(), f)).collect()),
            hits: Arc::default(),
        }
    }

    /// `(file name, Range header)` of every request so far.
    pub fn hits(&self) -> Vec<(String, Option<String>)> {
        self.hits.lock().unwrap().clone()
    }

    pub fn hit_count(&self) -> usize {
        self.hits.lock().unwrap().len()
    }

    /// Serve on an ephemeral port and return the base URL.
    pub async fn serve(&self) -> String {
        let app = Router::new()
            .route("/{name}", get(serve_file))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}

async fn serve_file(
    State(source): State<FakeSource>,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    let range = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request_index = {
        let mut hits = source.hits.lock().unwrap();
        hits.push((name.clone(), range.clone()));
        hits.iter().filter(|(n, _)| *n == name).count() - 1
    };

    let Some(file) = source.files.get(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let len = file.body.len();

    let start = if file.ignore_range {
        0
    } else {
        range
            .as_deref()
            .and_then(|r| r.strip_prefix("bytes="))
            .and_then(|r| r.trim_end_matches('-').parse::<usize>().ok())
            .unwrap_or(0)
    };
    if start > 0 && start >= len {
        return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    }

    let slice = file.body[start..].to_vec();
    let mut builder = Response::builder();
    if start > 0 {
        builder = builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(CONTENT_RANGE, format!("bytes {start}-{}/{len}", len - 1));
    } else {
        builder = builder.status(StatusCode::OK);
    }

    if request_index < file.interrupt_first {
        let half = Bytes::from(slice[..slice.len() / 2].to_vec());
        let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(half) }).chain(
            futures::stream::once(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err(std::io::Error::other("connection cut"))
            }),
        );
        return builder.body(Body::from_stream(stream)).unwrap();
    }

    builder
        .header(CONTENT_LENGTH, slice.len())
        .body(Body::from(slice))
        .unwrap()
}

/// A source that accepts connections and never answers. Returns its base
/// URL and the number of connections accepted so far.
pub async fn silent_source() -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });
    (format!("http://{addr}"), accepted)
}

/// A valid safetensors container holding one `U8` tensor of `data_len` bytes.
pub fn safetensors_blob(data_len: usize) -> Vec<u8> {
    let header = format!(
        r#"{{"__metadata__":{{"format":"pt"}},"weight":{{"dtype":"U8","shape":[{data_len}],"data_offsets":[0,{data_len}]}}}}"#
    );
    let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend((0..data_len).map(|i| (i % 251) as u8));
    bytes
}

/// Provisioning config for a temp volume: no disk floors, fast retries.
pub fn test_config(root: &Path, attempts: u32) -> ProvisionConfig {
    let mut config = ProvisionConfig::with_volume_root(root);
    config.disk.hard_floor_bytes = 0;
    config.disk.soft_floor_bytes = 0;
    config.retry.attempts = attempts;
    config.retry.delay = Duration::from_millis(10);
    config.connect_timeout = Duration::from_secs(5);
    config.stall_timeout = Duration::from_secs(5);
    config.size_tolerance_bytes = 0;
    config
}
