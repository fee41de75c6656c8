//! Buffered and streaming execution against a mock sandbox.

mod common;

use std::sync::Mutex;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use common::{client, event_stream, json as reply, serve, Hits};
use sandboxctl::cli::args::{ExecArgs, OutputFormat};
use sandboxctl::cli::commands;
use sandboxctl::client::completion;
use sandboxctl::client::{CancellationToken, RunRequest};
use sandboxctl::SandboxError;

#[tokio::test]
async fn test_run_buffered() {
    let routes = Router::new().route(
        "/run",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["cmd"], "echo hi");
            assert_eq!(body["cwd"], "/work");
            assert_eq!(body["env"]["MODE"], "test");
            reply(
                StatusCode::OK,
                json!({"stdout": "hi\n", "stderr": "", "code": 0}),
            )
        }),
    );
    let client = client(&serve(routes).await, 0);

    let request = RunRequest::new("echo hi").cwd("/work").env("MODE", "test");
    let result = client
        .run(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.stdout, "hi\n");
    assert_eq!(result.exit_code, 0);
    assert!(result.success());
}

#[tokio::test]
async fn test_run_nonzero_exit_is_not_an_error() {
    let routes = Router::new().route(
        "/run",
        post(|| async {
            reply(
                StatusCode::OK,
                json!({"stdout": "", "stderr": "boom\n", "exit_code": 2}),
            )
        }),
    );
    let client = client(&serve(routes).await, 0);

    let result = client
        .run(&RunRequest::new("false"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.exit_code, 2);
    assert_eq!(result.stderr, "boom\n");
    assert!(!result.success());
}

#[tokio::test]
async fn test_run_rejected_request() {
    let routes = Router::new().route(
        "/run",
        post(|| async { reply(StatusCode::BAD_REQUEST, json!({"error": "cmd is required"})) }),
    );
    let client = client(&serve(routes).await, 2);

    let err = client
        .run(&RunRequest::new(""), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        SandboxError::Status { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "cmd is required");
        }
        other => panic!("Expected Status, got {:?}", other),
    }
}

#[tokio::test]
async fn test_run_streaming_delivers_output_then_completion() {
    let routes = Router::new().route(
        "/run_streaming",
        post(|| async {
            event_stream(concat!(
                "event: output\n",
                "data: {\"stream\":\"stdout\",\"data\":\"hello\\n\"}\n",
                "\n",
                ": keepalive\n",
                "\n",
                "event: output\n",
                "data: {\"stream\":\"stderr\",\"data\":\"warn\\n\"}\n",
                "\n",
                "event: complete\n",
                "data: {\"code\":0,\"error\":false}\n",
                "\n",
                "event: output\n",
                "data: {\"stream\":\"stdout\",\"data\":\"after\"}\n",
                "\n",
            ))
        }),
    );
    let client = client(&serve(routes).await, 0);

    let log = Mutex::new(Vec::new());
    let (sender, waiter) = completion::channel();

    client
        .run_streaming(
            &RunRequest::new("build"),
            &CancellationToken::new(),
            |stream, data| log.lock().unwrap().push(format!("{}:{}", stream, data)),
            |code, had_error| {
                log.lock().unwrap().push(format!("complete:{}", code));
                sender.complete(code, had_error);
            },
        )
        .await
        .unwrap();

    let completion = waiter.wait().await.unwrap();
    assert_eq!(completion.code, 0);
    assert!(!completion.had_error);
    assert_eq!(
        log.into_inner().unwrap(),
        vec!["stdout:hello\n", "stderr:warn\n", "complete:0"]
    );
}

#[tokio::test]
async fn test_run_streaming_completion_on_another_task() {
    let routes = Router::new().route(
        "/run_streaming",
        post(|| async {
            event_stream(
                "event: output\r\ndata: {\"stream\":\"stdout\",\"data\":\"x\"}\r\n\r\n\
                 event: complete\r\ndata: {\"code\":3,\"error\":true}\r\n\r\n",
            )
        }),
    );
    let client = client(&serve(routes).await, 0);
    let (sender, waiter) = completion::channel();

    let handle = tokio::spawn(async move {
        client
            .run_streaming(
                &RunRequest::new("exit 3"),
                &CancellationToken::new(),
                |_, _| {},
                move |code, had_error| sender.complete(code, had_error),
            )
            .await
    });

    let completion = waiter.wait().await.unwrap();
    assert_eq!(completion.code, 3);
    assert!(completion.had_error);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_run_streaming_error_event() {
    let routes = Router::new().route(
        "/run_streaming",
        post(|| async {
            event_stream("event: error\ndata: {\"error\":\"command not allowed\"}\n\n")
        }),
    );
    let client = client(&serve(routes).await, 0);
    let (sender, waiter) = completion::channel();

    let err = client
        .run_streaming(
            &RunRequest::new("rm -rf /"),
            &CancellationToken::new(),
            |_, _| {},
            move |code, had_error| sender.complete(code, had_error),
        )
        .await
        .unwrap_err();

    match err {
        SandboxError::Stream(message) => assert_eq!(message, "command not allowed"),
        other => panic!("Expected Stream error, got {:?}", other),
    }
    assert!(matches!(waiter.wait().await, Err(SandboxError::StreamClosed)));
}

#[tokio::test]
async fn test_run_streaming_truncated_stream() {
    let routes = Router::new().route(
        "/run_streaming",
        post(|| async { event_stream("event: output\ndata: {\"stream\":\"stdout\",\"data\":\"partial\"}\n\n") }),
    );
    let client = client(&serve(routes).await, 0);

    let mut outputs = Vec::new();
    let mut completed = false;
    let err = client
        .run_streaming(
            &RunRequest::new("sleep 100"),
            &CancellationToken::new(),
            |_, data| outputs.push(data.to_string()),
            |_, _| completed = true,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SandboxError::StreamClosed));
    assert_eq!(outputs, vec!["partial"]);
    assert!(!completed);
}

#[tokio::test]
async fn test_run_streaming_not_retried() {
    let hits = Hits::default();
    let counter = hits.clone();
    let routes = Router::new().route(
        "/run_streaming",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.bump();
                reply(StatusCode::SERVICE_UNAVAILABLE, json!({"error": "busy"}))
            }
        }),
    );
    let client = client(&serve(routes).await, 3);

    let err = client
        .run_streaming(
            &RunRequest::new("ls"),
            &CancellationToken::new(),
            |_, _| {},
            |_, _| {},
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SandboxError::Status { status: 503, .. }));
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn test_run_streaming_cancelled_while_open() {
    let routes = Router::new().route(
        "/run_streaming",
        post(|| async {
            common::open_event_stream(
                "event: output\ndata: {\"stream\":\"stdout\",\"data\":\"compiling\"}\n\n",
            )
        }),
    );
    let client = client(&serve(routes).await, 0);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let (sender, waiter) = completion::channel();
    let mut outputs = Vec::new();
    let started = std::time::Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        client.run_streaming(
            &RunRequest::new("cargo build"),
            &cancel,
            |_, data| outputs.push(data.to_string()),
            move |code, had_error| sender.complete(code, had_error),
        ),
    )
    .await
    .expect("cancellation should end the stream");

    assert!(matches!(result, Err(SandboxError::Cancelled)), "got {:?}", result);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(outputs, vec!["compiling"]);
    assert!(matches!(waiter.wait().await, Err(SandboxError::StreamClosed)));
}

fn exec_args(command: &str, stream: bool) -> ExecArgs {
    ExecArgs {
        command: command.to_string(),
        cwd: None,
        env_vars: Vec::new(),
        timeout: None,
        stream,
    }
}

#[tokio::test]
async fn test_exec_reports_remote_exit_code_in_every_format() {
    let routes = Router::new()
        .route(
            "/run",
            post(|| async {
                reply(
                    StatusCode::OK,
                    json!({"stdout": "", "stderr": "tests failed\n", "code": 3}),
                )
            }),
        )
        .route(
            "/run_streaming",
            post(|| async { event_stream("event: complete\ndata: {\"code\":3,\"error\":false}\n\n") }),
        );
    let client = client(&serve(routes).await, 0);
    let cancel = CancellationToken::new();

    for format in [OutputFormat::Text, OutputFormat::Json] {
        for stream in [false, true] {
            let code = commands::exec(exec_args("make test", stream), &client, format, &cancel)
                .await
                .unwrap();
            assert_eq!(code, 3, "format {:?}, stream {}", format, stream);
        }
    }
}
