//! In-process mock sandbox for integration tests.
//!
//! Each test builds an axum router for the endpoints it needs, serves it on an
//! ephemeral port under the API prefix, and points a client at it.

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use sandboxctl::client::{ClientConfig, SandboxClient};

pub const TOKEN: &str = "test-token";

/// Serve `routes` under `/_sandbox` and return the client base address.
pub async fn serve(routes: Router) -> String {
    let app = Router::new().nest("/_sandbox", routes);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock sandbox");
    let addr = listener.local_addr().expect("mock sandbox address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock sandbox server");
    });
    format!("http://{}/_sandbox", addr)
}

/// Client with a short backoff so retry tests stay fast.
pub fn client(base_url: &str, max_retries: u32) -> SandboxClient {
    let config = ClientConfig::builder()
        .base_url(base_url)
        .token(TOKEN)
        .timeout(Duration::from_secs(5))
        .max_retries(max_retries)
        .retry_delay(Duration::from_millis(10))
        .stream_timeout(Duration::from_secs(5))
        .build()
        .expect("valid client config");
    SandboxClient::new(config).expect("client")
}

/// Shared request counter for handlers.
#[derive(Clone, Default)]
pub struct Hits(Arc<AtomicUsize>);

impl Hits {
    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// A `text/event-stream` response with the given raw body.
pub fn event_stream(body: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/event-stream")],
        body.into(),
    )
        .into_response()
}

/// A `text/event-stream` response that sends `first` and then stays open
/// without sending anything else.
pub fn open_event_stream(first: &'static str) -> Response {
    use futures::StreamExt;

    let body = futures::stream::once(async move { Ok::<_, Infallible>(Bytes::from(first)) })
        .chain(futures::stream::pending());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(body),
    )
        .into_response()
}

/// A JSON response with an explicit status.
pub fn json(status: StatusCode, value: serde_json::Value) -> Response {
    (status, axum::Json(value)).into_response()
}
