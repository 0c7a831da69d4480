//! Dispatcher behaviour against a fake ComfyUI backend.

mod common;

use std::time::{Duration, Instant};

use serde_json::Value;

use headswap_core::job::{JobInput, JobOutput};

use common::{
    b64, dispatcher, entries, fast_config, template_json, FakeComfyUI, HistoryBehavior, OUTPUT_BYTES,
};

struct Dirs {
    _root: tempfile::TempDir,
    input: std::path::PathBuf,
    output: std::path::PathBuf,
}

fn dirs() -> Dirs {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input");
    let output = root.path().join("output");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::create_dir_all(&output).unwrap();
    Dirs {
        _root: root,
        input,
        output,
    }
}

fn job() -> JobInput {
    JobInput {
        head_image: Some(format!("data:image/png;base64,{}", b64(b"head pixels"))),
        body_image: Some(b64(b"body pixels")),
    }
}

fn error_of(output: &JobOutput) -> &str {
    output.error_message().expect("job should have failed")
}

// ---------------------------------------------------------------------------
// Success path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_job_returns_output_and_removes_every_file() {
    let d = dirs();
    let fake = FakeComfyUI::new(&d.input, &d.output, HistoryBehavior::Complete { ready_after: 2 });
    let url = fake.serve().await;
    let dispatcher = dispatcher(fast_config(&url, &d.input, &d.output), template_json());

    let output = dispatcher.handle_job(job()).await;

    assert_eq!(output, JobOutput::Success { result: b64(OUTPUT_BYTES) });

    let submissions = fake.submissions();
    assert_eq!(submissions.len(), 1);
    let head = submissions[0]["10"]["inputs"]["image"].as_str().unwrap();
    let body = submissions[0]["11"]["inputs"]["image"].as_str().unwrap();
    assert!(head.starts_with("head_") && head.ends_with(".png"), "{head}");
    assert!(body.starts_with("body_") && body.ends_with(".png"), "{body}");
    assert_eq!(head.trim_start_matches("head_"), body.trim_start_matches("body_"));
    assert_eq!(fake.staged_inputs_present(), vec![true]);

    assert_eq!(entries(&d.input), 0);
    assert_eq!(entries(&d.output), 0);
}

#[tokio::test]
async fn output_listed_before_it_is_written_keeps_polling() {
    let d = dirs();
    let fake = FakeComfyUI::new(&d.input, &d.output, HistoryBehavior::Complete { ready_after: 4 });
    let url = fake.serve().await;
    let dispatcher = dispatcher(fast_config(&url, &d.input, &d.output), template_json());

    let output = dispatcher.handle_job(job()).await;

    assert!(output.is_success(), "{output:?}");
    assert!(fake.history_calls() >= 4);
}

#[tokio::test]
async fn transient_submission_failures_are_retried() {
    let d = dirs();
    let fake = FakeComfyUI::new(&d.input, &d.output, HistoryBehavior::Complete { ready_after: 1 })
        .failing_submissions(2);
    let url = fake.serve().await;
    let dispatcher = dispatcher(fast_config(&url, &d.input, &d.output), template_json());

    let output = dispatcher.handle_job(job()).await;

    assert!(output.is_success(), "{output:?}");
    assert_eq!(fake.submit_attempts(), 3);
}

// ---------------------------------------------------------------------------
// Schema errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_head_image_names_the_field_and_writes_nothing() {
    let d = dirs();
    let fake = FakeComfyUI::new(&d.input, &d.output, HistoryBehavior::Pending);
    let url = fake.serve().await;
    let dispatcher = dispatcher(fast_config(&url, &d.input, &d.output), template_json());

    let input = JobInput {
        head_image: None,
        body_image: Some(b64(b"body")),
    };
    let output = dispatcher.handle_job(input).await;

    assert!(error_of(&output).contains("head_image"));
    assert_eq!(entries(&d.input), 0);
    assert_eq!(fake.submit_attempts(), 0);
}

#[tokio::test]
async fn undecodable_body_image_writes_nothing() {
    let d = dirs();
    let fake = FakeComfyUI::new(&d.input, &d.output, HistoryBehavior::Pending);
    let url = fake.serve().await;
    let dispatcher = dispatcher(fast_config(&url, &d.input, &d.output), template_json());

    let input = JobInput {
        head_image: Some(b64(b"head")),
        body_image: Some("%%% not base64 %%%".to_string()),
    };
    let output = dispatcher.handle_job(input).await;

    assert!(error_of(&output).contains("body_image"));
    assert_eq!(entries(&d.input), 0);
    assert_eq!(fake.submit_attempts(), 0);
}

#[tokio::test]
async fn missing_node_title_is_named_and_nothing_is_submitted() {
    let d = dirs();
    let fake = FakeComfyUI::new(&d.input, &d.output, HistoryBehavior::Pending);
    let url = fake.serve().await;

    let mut template = template_json();
    template["30"]["_meta"]["title"] = Value::from("Save Image");
    let dispatcher = dispatcher(fast_config(&url, &d.input, &d.output), template);

    let output = dispatcher.handle_job(job()).await;

    assert!(error_of(&output).contains("SAVE_OUTPUT"));
    assert_eq!(fake.submit_attempts(), 0);
    assert_eq!(entries(&d.input), 0);
}

// ---------------------------------------------------------------------------
// Backend failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backend_that_never_finishes_times_out_and_cleans_up() {
    let d = dirs();
    let fake = FakeComfyUI::new(&d.input, &d.output, HistoryBehavior::Pending);
    let url = fake.serve().await;
    let mut config = fast_config(&url, &d.input, &d.output);
    config.job_timeout = Duration::from_millis(300);
    let dispatcher = dispatcher(config, template_json());

    let started = Instant::now();
    let output = dispatcher.handle_job(job()).await;

    let error = error_of(&output);
    assert!(error.starts_with("Timeout:"), "{error}");
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(fake.submit_attempts(), 1);
    assert_eq!(entries(&d.input), 0);
}

#[tokio::test]
async fn six_failed_polls_report_a_crash_before_the_deadline() {
    let d = dirs();
    let fake = FakeComfyUI::new(&d.input, &d.output, HistoryBehavior::Fail);
    let url = fake.serve().await;
    let mut config = fast_config(&url, &d.input, &d.output);
    config.job_timeout = Duration::from_secs(60);
    let dispatcher = dispatcher(config, template_json());

    let started = Instant::now();
    let output = dispatcher.handle_job(job()).await;

    let error = error_of(&output);
    assert!(error.starts_with("CRITICAL:"), "{error}");
    assert!(!error.starts_with("Timeout:"));
    assert_eq!(fake.history_calls(), 6);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(entries(&d.input), 0);
}

#[tokio::test]
async fn execution_error_fails_without_waiting_for_the_deadline() {
    let d = dirs();
    let fake = FakeComfyUI::new(&d.input, &d.output, HistoryBehavior::ExecutionError);
    let url = fake.serve().await;
    let mut config = fast_config(&url, &d.input, &d.output);
    config.job_timeout = Duration::from_secs(60);
    let dispatcher = dispatcher(config, template_json());

    let output = dispatcher.handle_job(job()).await;

    let error = error_of(&output);
    assert!(error.contains("CUDA out of memory"), "{error}");
    assert_eq!(fake.history_calls(), 1);
    assert_eq!(entries(&d.input), 0);
}

#[tokio::test]
async fn unreadable_output_location_keeps_polling_until_the_deadline() {
    let d = dirs();
    // A regular file where the output directory should be: checking the
    // listed output fails with NotADirectory rather than NotFound.
    let blocked = d._root.path().join("blocked");
    std::fs::write(&blocked, b"not a directory").unwrap();
    let fake = FakeComfyUI::new(&d.input, &blocked, HistoryBehavior::Complete { ready_after: usize::MAX });
    let url = fake.serve().await;
    let mut config = fast_config(&url, &d.input, &blocked);
    config.job_timeout = Duration::from_millis(300);
    let dispatcher = dispatcher(config, template_json());

    let output = dispatcher.handle_job(job()).await;

    let error = error_of(&output);
    assert!(error.starts_with("Timeout:"), "{error}");
    assert!(fake.history_calls() > 1);
    assert_eq!(entries(&d.input), 0);
}

#[tokio::test]
async fn submission_gives_up_after_three_attempts() {
    let d = dirs();
    let fake = FakeComfyUI::new(&d.input, &d.output, HistoryBehavior::Pending).failing_submissions(10);
    let url = fake.serve().await;
    let dispatcher = dispatcher(fast_config(&url, &d.input, &d.output), template_json());

    let output = dispatcher.handle_job(job()).await;

    let error = error_of(&output);
    assert!(error.starts_with("Failed to queue prompt after 3 attempts"), "{error}");
    assert_eq!(fake.submit_attempts(), 3);
    assert_eq!(fake.history_calls(), 0);
    assert_eq!(entries(&d.input), 0);
}
