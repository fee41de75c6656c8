//! Retry, status mapping, auth and cancellation behaviour of the transport.

mod common;

use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;

use common::{client, json as reply, serve, Hits};
use sandboxctl::client::{CancellationToken, ClientConfig, RunRequest, SandboxClient};
use sandboxctl::SandboxError;

#[tokio::test]
async fn test_server_errors_retried_until_exhausted() {
    let hits = Hits::default();
    let counter = hits.clone();
    let routes = Router::new().route(
        "/list_processes",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.bump();
                reply(StatusCode::SERVICE_UNAVAILABLE, json!({"error": "warming up"}))
            }
        }),
    );
    let client = client(&serve(routes).await, 2);

    let err = client
        .list_processes(&CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        SandboxError::RetriesExhausted {
            attempts,
            last_status,
            ref message,
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(last_status, Some(503));
            assert!(message.contains("503"));
        }
        other => panic!("Expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(hits.count(), 3);
}

#[tokio::test]
async fn test_client_errors_not_retried() {
    let hits = Hits::default();
    let counter = hits.clone();
    let routes = Router::new().route(
        "/list_processes",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.bump();
                reply(StatusCode::NOT_FOUND, json!({"error": "no such endpoint"}))
            }
        }),
    );
    let client = client(&serve(routes).await, 3);

    let err = client
        .list_processes(&CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        SandboxError::Status { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "no such endpoint");
        }
        other => panic!("Expected Status, got {:?}", other),
    }
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn test_success_is_single_attempt() {
    let hits = Hits::default();
    let counter = hits.clone();
    let routes = Router::new().route(
        "/list_processes",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.bump();
                reply(StatusCode::OK, json!({"processes": []}))
            }
        }),
    );
    let client = client(&serve(routes).await, 3);

    let processes = client
        .list_processes(&CancellationToken::new())
        .await
        .unwrap();
    assert!(processes.is_empty());
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let hits = Hits::default();
    let counter = hits.clone();
    let routes = Router::new().route(
        "/list_processes",
        get(move || {
            let counter = counter.clone();
            async move {
                if counter.bump() == 1 {
                    reply(StatusCode::BAD_GATEWAY, json!({}))
                } else {
                    reply(StatusCode::OK, json!([{"id": "p1", "status": "running"}]))
                }
            }
        }),
    );
    let client = client(&serve(routes).await, 3);

    let processes = client
        .list_processes(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(processes.len(), 1);
    assert_eq!(hits.count(), 2);
}

#[tokio::test]
async fn test_cancel_during_backoff() {
    let hits = Hits::default();
    let counter = hits.clone();
    let routes = Router::new().route(
        "/list_processes",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.bump();
                reply(StatusCode::INTERNAL_SERVER_ERROR, json!({}))
            }
        }),
    );
    let base_url = serve(routes).await;
    let config = ClientConfig::builder()
        .base_url(base_url)
        .token(common::TOKEN)
        .max_retries(5)
        .retry_delay(Duration::from_secs(30))
        .build()
        .unwrap();
    let client = SandboxClient::new(config).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), client.list_processes(&cancel))
        .await
        .expect("cancellation should end the backoff wait");
    assert!(matches!(result, Err(SandboxError::Cancelled)));
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn test_already_cancelled_sends_nothing() {
    let hits = Hits::default();
    let counter = hits.clone();
    let routes = Router::new().route(
        "/make_dir",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.bump();
                reply(StatusCode::OK, json!({"success": true}))
            }
        }),
    );
    let client = client(&serve(routes).await, 0);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = client.make_dir("/tmp/x", &cancel).await;
    assert!(matches!(result, Err(SandboxError::Cancelled)));
}

#[tokio::test]
async fn test_bearer_token_sent() {
    let routes = Router::new().route(
        "/list_processes",
        get(|headers: HeaderMap| async move {
            let expected = format!("Bearer {}", common::TOKEN);
            match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                Some(value) if value == expected => reply(StatusCode::OK, json!([])),
                _ => reply(StatusCode::UNAUTHORIZED, json!({"error": "bad token"})),
            }
        }),
    );
    let client = client(&serve(routes).await, 0);

    assert!(client
        .list_processes(&CancellationToken::new())
        .await
        .is_ok());
}

#[tokio::test]
async fn test_unreachable_sandbox_exhausts_retries() {
    // Bind and drop to get a port with nothing listening.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client(&format!("http://{}/_sandbox", addr), 1);
    let err = client
        .list_processes(&CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        SandboxError::RetriesExhausted {
            attempts,
            last_status,
            ..
        } => {
            assert_eq!(attempts, 2);
            assert_eq!(last_status, None);
        }
        other => panic!("Expected RetriesExhausted, got {:?}", other),
    }
}

fn client_with_timeout(base_url: &str, timeout: Duration, max_retries: u32) -> SandboxClient {
    let config = ClientConfig::builder()
        .base_url(base_url)
        .token(common::TOKEN)
        .timeout(timeout)
        .max_retries(max_retries)
        .retry_delay(Duration::from_millis(400))
        .build()
        .unwrap();
    SandboxClient::new(config).unwrap()
}

#[tokio::test]
async fn test_timed_out_request_not_retried() {
    let hits = Hits::default();
    let counter = hits.clone();
    let routes = Router::new().route(
        "/list_processes",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.bump();
                tokio::time::sleep(Duration::from_secs(30)).await;
                reply(StatusCode::OK, json!([]))
            }
        }),
    );
    let client = client_with_timeout(&serve(routes).await, Duration::from_millis(300), 2);

    let started = std::time::Instant::now();
    let err = client
        .list_processes(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "expected Timeout, got {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(3));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn test_timed_out_run_executes_once() {
    let hits = Hits::default();
    let counter = hits.clone();
    let routes = Router::new().route(
        "/run",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.bump();
                tokio::time::sleep(Duration::from_secs(60)).await;
                reply(StatusCode::OK, json!({"stdout": "", "stderr": "", "code": 0}))
            }
        }),
    );
    let client = client_with_timeout(&serve(routes).await, Duration::from_secs(5), 2);

    let started = std::time::Instant::now();
    let err = client
        .run(&RunRequest::new("make deploy").timeout(1), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SandboxError::Timeout(_)), "got {:?}", err);
    // One second of command time plus the grace period, never a second attempt.
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn test_deadline_bounds_retry_backoff() {
    let hits = Hits::default();
    let counter = hits.clone();
    let routes = Router::new().route(
        "/list_processes",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.bump();
                reply(StatusCode::SERVICE_UNAVAILABLE, json!({}))
            }
        }),
    );
    let client = client_with_timeout(&serve(routes).await, Duration::from_millis(600), 5);

    let started = std::time::Instant::now();
    let err = client
        .list_processes(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "expected Timeout, got {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(hits.count() <= 2);
}
