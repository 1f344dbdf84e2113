//! Stand-in upstream origin for exercising the localhost bridge over real HTTP.
//!
//! # Design
//! Every route is deterministic except `/stall`, whose first request never
//! completes within test time so callers can cancel mid-flight and observe a
//! restart. All requests bump a shared hit counter, letting tests prove that
//! rejected guest calls never reached the network.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

/// Size of the `/large` body; larger than any inline-body threshold.
pub const LARGE_BODY_LEN: usize = 64 * 1024;

/// Shared counters observed by tests.
#[derive(Clone, Debug, Default)]
pub struct OriginState {
    hits: Arc<AtomicUsize>,
    stall_hits: Arc<AtomicUsize>,
}

impl OriginState {
    /// Total number of requests received on any route.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Number of requests received on `/stall`.
    pub fn stall_hits(&self) -> usize {
        self.stall_hits.load(Ordering::SeqCst)
    }
}

/// Echo of what the origin saw, returned by `/inspect`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inspection {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub host: Option<String>,
    pub body_len: usize,
}

pub fn app() -> Router {
    app_with_state(OriginState::default())
}

pub fn app_with_state(state: OriginState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/inspect", any(inspect))
        .route("/echo", post(echo))
        .route("/large", get(large))
        .route("/bytes/{n}", get(bytes))
        .route("/empty", get(empty))
        .route("/status/{code}", get(status))
        .route("/stall", get(stall))
        .layer(middleware::from_fn_with_state(state.clone(), count_hits))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, OriginState::default()).await
}

pub async fn serve(listener: TcpListener, state: OriginState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

/// Answer every connection with a response head promising more body bytes
/// than are ever written, then hang up.
pub async fn run_truncating(listener: TcpListener) -> Result<(), std::io::Error> {
    answer_raw(
        listener,
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: 10\r\n\
         Connection: close\r\n\r\nabc",
    )
    .await
}

/// Answer every connection with a chunked body, so the response carries no
/// `Content-Length` at all.
pub async fn run_chunked(listener: TcpListener) -> Result<(), std::io::Error> {
    answer_raw(
        listener,
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain\r\n\
         Transfer-Encoding: chunked\r\n\
         Connection: close\r\n\r\n\
         5\r\nhello\r\n0\r\n\r\n",
    )
    .await
}

/// Write `response` verbatim once each request head has arrived.
async fn answer_raw(listener: TcpListener, response: &'static str) -> Result<(), std::io::Error> {
    loop {
        let (mut stream, _) = listener.accept().await?;
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let mut seen = Vec::new();
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => seen.extend_from_slice(&buf[..n]),
                }
            }
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
    }
}

async fn count_hits(State(state): State<OriginState>, request: Request, next: Next) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    tracing::debug!(method = %request.method(), uri = %request.uri(), "origin hit");
    next.run(request).await
}

async fn health() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "ok")
}

async fn inspect(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Inspection> {
    let text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(Inspection {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        content_type: text(header::CONTENT_TYPE),
        host: text(header::HOST),
        body_len: body.len(),
    })
}

async fn echo(headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("application/octet-stream"));
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn large() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        vec![b'x'; LARGE_BODY_LEN],
    )
}

async fn bytes(Path(n): Path<usize>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        vec![b'x'; n.min(LARGE_BODY_LEN)],
    )
}

async fn empty() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

async fn stall(State(state): State<OriginState>) -> impl IntoResponse {
    if state.stall_hits.fetch_add(1, Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_secs(300)).await;
    }
    ([(header::CONTENT_TYPE, "text/plain")], "recovered")
}
