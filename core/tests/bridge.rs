//! Guest calls served end-to-end against the live mock origin.
//!
//! # Design
//! Each test starts its own mock origin on a random port and drives a fresh
//! instance through `Instance::handle`, then decodes the reply packet the way
//! a guest would. The origin's hit counter shows whether a call reached the
//! network at all.

use localhost_core::{
    Call, Code, Config, Domain, HttpRequest, HttpResponse, InstanceConfig, LocalhostService, Packet,
    Service, INLINE_BODY_LIMIT, NO_STREAM, PENDING_STREAM,
};
use mock_server::{Inspection, OriginState, LARGE_BODY_LEN};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

async fn spawn_origin() -> (String, OriginState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = OriginState::default();
    tokio::spawn(mock_server::serve(listener, state.clone()));
    (format!("http://{addr}"), state)
}

/// An origin address with nothing listening on it.
async fn dead_origin() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn service(origin: &str) -> LocalhostService {
    LocalhostService::new(Config::new(Url::parse(origin).unwrap())).unwrap()
}

fn request(method: &str, uri: &str) -> HttpRequest {
    HttpRequest {
        method: method.to_string(),
        uri: uri.to_string(),
        ..HttpRequest::default()
    }
}

/// Run one call through a fresh instance and decode the reply.
async fn call(service: &LocalhostService, req: HttpRequest) -> HttpResponse {
    let (tx, mut rx) = mpsc::channel(1);
    let mut inst = service.create_instance(InstanceConfig { code: Code(1) });
    let packet = Packet::build(Code(1), Domain::Call, |buf| Call::http(req).encode_into(buf));

    inst.handle(&CancellationToken::new(), &tx, packet).await;

    assert!(inst.extract_state().is_empty(), "instance should be idle after a reply");
    let reply = rx.try_recv().expect("a reply packet");
    assert_eq!(reply.domain(), Some(Domain::Call));
    assert_eq!(reply.code(), Code(1));
    HttpResponse::decode(reply.content()).unwrap()
}

#[tokio::test]
async fn health_is_returned_inline() {
    let (origin, _) = spawn_origin().await;

    let res = call(&service(&origin), request("GET", "/health")).await;

    assert_eq!(
        res,
        HttpResponse {
            status_code: 200,
            content_length: 2,
            content_type: "text/plain".to_string(),
            body: b"ok".to_vec(),
            body_stream_id: NO_STREAM,
        }
    );
}

#[tokio::test]
async fn path_and_query_are_forwarded_unchanged() {
    let (origin, _) = spawn_origin().await;

    let res = call(&service(&origin), request("GET", "/inspect?a=1&b=two%20words")).await;

    assert_eq!(res.status_code, 200);
    let seen: Inspection = serde_json::from_slice(&res.body).unwrap();
    assert_eq!(seen.method, "GET");
    assert_eq!(seen.path, "/inspect");
    assert_eq!(seen.query.as_deref(), Some("a=1&b=two%20words"));
    assert_eq!(seen.host.as_deref(), origin.strip_prefix("http://"));
}

#[tokio::test]
async fn content_type_and_body_are_forwarded() {
    let (origin, _) = spawn_origin().await;
    let req = HttpRequest {
        method: "PUT".to_string(),
        uri: "/inspect".to_string(),
        content_type: "text/csv".to_string(),
        body: b"a,b,c".to_vec(),
    };

    let res = call(&service(&origin), req).await;

    let seen: Inspection = serde_json::from_slice(&res.body).unwrap();
    assert_eq!(seen.method, "PUT");
    assert_eq!(seen.content_type.as_deref(), Some("text/csv"));
    assert_eq!(seen.body_len, 5);
}

#[tokio::test]
async fn empty_method_is_sent_as_get() {
    let (origin, _) = spawn_origin().await;

    let res = call(&service(&origin), request("", "/inspect")).await;

    let seen: Inspection = serde_json::from_slice(&res.body).unwrap();
    assert_eq!(seen.method, "GET");
}

#[tokio::test]
async fn post_body_is_echoed() {
    let (origin, _) = spawn_origin().await;
    let req = HttpRequest {
        method: "POST".to_string(),
        uri: "/echo".to_string(),
        content_type: "application/json".to_string(),
        body: br#"{"n":1}"#.to_vec(),
    };

    let res = call(&service(&origin), req).await;

    assert_eq!(res.status_code, 200);
    assert_eq!(res.content_type, "application/json");
    assert_eq!(res.content_length, 7);
    assert_eq!(res.body, br#"{"n":1}"#);
}

#[tokio::test]
async fn large_body_is_not_inlined() {
    let (origin, _) = spawn_origin().await;

    let res = call(&service(&origin), request("GET", "/large")).await;

    assert_eq!(res.status_code, 200);
    assert_eq!(res.content_length, LARGE_BODY_LEN as i64);
    assert!(res.body.is_empty());
    assert_eq!(res.body_stream_id, PENDING_STREAM);
}

#[tokio::test]
async fn body_at_the_inline_limit_is_inlined() {
    let (origin, _) = spawn_origin().await;
    let uri = format!("/bytes/{INLINE_BODY_LIMIT}");

    let res = call(&service(&origin), request("GET", &uri)).await;

    assert_eq!(res.content_length, INLINE_BODY_LIMIT);
    assert_eq!(res.body.len(), INLINE_BODY_LIMIT as usize);
    assert_eq!(res.body_stream_id, NO_STREAM);
}

#[tokio::test]
async fn body_one_past_the_inline_limit_is_not_inlined() {
    let (origin, _) = spawn_origin().await;
    let uri = format!("/bytes/{}", INLINE_BODY_LIMIT + 1);

    let res = call(&service(&origin), request("GET", &uri)).await;

    assert_eq!(res.content_length, INLINE_BODY_LIMIT + 1);
    assert!(res.body.is_empty());
    assert_eq!(res.body_stream_id, PENDING_STREAM);
}

#[tokio::test]
async fn chunked_body_has_unknown_length_and_is_not_inlined() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(mock_server::run_chunked(listener));

    let res = call(&service(&origin), request("GET", "/anything")).await;

    assert_eq!(res.status_code, 200);
    assert_eq!(res.content_length, -1);
    assert!(res.body.is_empty());
    assert_eq!(res.body_stream_id, PENDING_STREAM);
}

#[tokio::test]
async fn no_content_has_no_body_or_stream() {
    let (origin, _) = spawn_origin().await;

    let res = call(&service(&origin), request("GET", "/empty")).await;

    assert_eq!(res.status_code, 204);
    assert_eq!(res.content_length, 0);
    assert!(res.body.is_empty());
    assert_eq!(res.body_stream_id, NO_STREAM);
}

#[tokio::test]
async fn upstream_status_is_passed_through() {
    let (origin, _) = spawn_origin().await;

    let res = call(&service(&origin), request("GET", "/status/404")).await;
    assert_eq!(res.status_code, 404);

    let res = call(&service(&origin), request("GET", "/status/503")).await;
    assert_eq!(res.status_code, 503);
}

#[tokio::test]
async fn head_never_reads_a_body() {
    let (origin, _) = spawn_origin().await;

    let res = call(&service(&origin), request("HEAD", "/health")).await;

    assert_eq!(res.status_code, 200);
    assert!(res.body.is_empty());
    assert_eq!(res.body_stream_id, NO_STREAM);
}

#[tokio::test]
async fn foreign_host_is_refused_without_io() {
    let (origin, state) = spawn_origin().await;
    let svc = service(&origin);
    let authority = origin.strip_prefix("http:").unwrap();

    for uri in [
        "http://evil.example/x".to_string(),
        "//evil.example/x".to_string(),
        format!("{origin}/health"),
        format!("{authority}/health"),
    ] {
        let res = call(&svc, request("GET", &uri)).await;
        assert_eq!(res, HttpResponse::status(400), "{uri}");
    }
    assert_eq!(state.hits(), 0);
}

#[tokio::test]
async fn unreachable_origin_is_bad_gateway() {
    let origin = dead_origin().await;

    let res = call(&service(&origin), request("GET", "/health")).await;
    assert_eq!(res, HttpResponse::status(502));

    let res = call(&service(&origin), request("POST", "/echo")).await;
    assert_eq!(res, HttpResponse::status(502));
}

#[tokio::test]
async fn short_body_is_internal_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(mock_server::run_truncating(listener));

    let res = call(&service(&origin), request("GET", "/anything")).await;

    assert_eq!(res, HttpResponse::status(500));
}
