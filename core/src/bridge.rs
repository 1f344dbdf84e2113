//! HTTP bridge from guest calls to the configured origin.
//!
//! # Design
//! The guest names only a path and query; scheme, credentials, host and port
//! always come from the configured origin. URIs carrying a scheme or an
//! authority are refused before any I/O happens, so a guest can never steer
//! the client at another host.
//!
//! Every failure is turned into a status code on an otherwise normal
//! response. The one exception is an idempotent request (GET or HEAD) that
//! fails because the caller's context was cancelled: that yields
//! `BridgeOutcome::Restart` and the whole call is issued again on resume.

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::codec::{HttpRequest, HttpResponse, NO_STREAM};
use crate::error::BridgeError;

/// Largest body returned inline in a response.
pub const INLINE_BODY_LIMIT: i64 = 32 * 1024;

/// Stream id placed in responses whose body would have to be streamed.
/// Streaming is not implemented; the body is not delivered.
pub const PENDING_STREAM: i32 = 0;

/// Base used only to resolve guest URIs; its host never reaches the wire.
const RESOLVE_BASE: &str = "http://guest.invalid/";

/// Result of serving one HTTP call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Reply to the guest with this response.
    Respond(HttpResponse),
    /// The call was interrupted and must be issued again after resume.
    Restart,
}

/// Origin-pinned HTTP executor shared by all instances of a service.
#[derive(Debug, Clone)]
pub struct HttpBridge {
    origin: Url,
    client: Client,
}

impl HttpBridge {
    pub fn new(origin: Url, client: Client) -> Self {
        Self { origin, client }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Resolve a guest URI against the origin, keeping only its path and
    /// query.
    pub fn target_url(&self, uri: &str) -> Result<Url, BridgeError> {
        match Url::parse(uri) {
            Ok(_) => return Err(BridgeError::ClientHostMismatch(uri.to_string())),
            Err(url::ParseError::RelativeUrlWithoutBase) => {}
            Err(e) => return Err(BridgeError::ClientUri(e.to_string())),
        }
        if names_authority(uri) {
            return Err(BridgeError::ClientHostMismatch(uri.to_string()));
        }

        let base = Url::parse(RESOLVE_BASE).map_err(|e| BridgeError::ClientUri(e.to_string()))?;
        let parsed = base
            .join(uri)
            .map_err(|e| BridgeError::ClientUri(e.to_string()))?;
        if parsed.host_str() != base.host_str()
            || parsed.port().is_some()
            || !parsed.username().is_empty()
        {
            return Err(BridgeError::ClientHostMismatch(uri.to_string()));
        }

        let mut target = self.origin.clone();
        target.set_path(parsed.path());
        target.set_query(parsed.query());
        target.set_fragment(None);
        Ok(target)
    }

    /// Serve one guest HTTP call.
    pub async fn execute(&self, ctx: &CancellationToken, call: &HttpRequest) -> BridgeOutcome {
        let method_name = if call.method.is_empty() { "GET" } else { call.method.as_str() };
        let idempotent = method_name == "GET" || method_name == "HEAD";

        let url = match self.target_url(&call.uri) {
            Ok(url) => url,
            Err(e) => return reject(e),
        };

        let response = match self.send(ctx, method_name, url, call).await {
            Ok(response) => response,
            Err(e) => {
                if idempotent && ctx.is_cancelled() {
                    tracing::debug!(
                        method = method_name,
                        uri = %call.uri,
                        "call interrupted, restart on resume"
                    );
                    return BridgeOutcome::Restart;
                }
                return reject(e);
            }
        };

        match self.translate(ctx, method_name, response).await {
            Ok(res) => BridgeOutcome::Respond(res),
            Err(e) => reject(e),
        }
    }

    async fn send(
        &self,
        ctx: &CancellationToken,
        method_name: &str,
        url: Url,
        call: &HttpRequest,
    ) -> Result<Response, BridgeError> {
        let method = Method::from_bytes(method_name.as_bytes()).map_err(|_| {
            BridgeError::UpstreamTransport(format!("invalid method {method_name:?}"))
        })?;

        let mut builder = self.client.request(method, url);
        if !call.content_type.is_empty() {
            builder = builder.header(CONTENT_TYPE, call.content_type.as_str());
        }
        if !call.body.is_empty() {
            builder = builder.body(call.body.clone());
        }
        let request = builder
            .build()
            .map_err(|e| BridgeError::UpstreamTransport(e.to_string()))?;

        tracing::debug!(method = method_name, url = %request.url(), "forwarding call");
        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                Err(BridgeError::UpstreamTransport("request cancelled".to_string()))
            }
            res = self.client.execute(request) => {
                res.map_err(|e| BridgeError::UpstreamTransport(e.to_string()))
            }
        }
    }

    /// Map an upstream response onto the guest response. The upstream body
    /// is released when `response` drops, on every path.
    async fn translate(
        &self,
        ctx: &CancellationToken,
        method_name: &str,
        response: Response,
    ) -> Result<HttpResponse, BridgeError> {
        let status = response.status();
        let status_code = i32::from(status.as_u16());
        let content_type = header_text(&response, CONTENT_TYPE).unwrap_or_default();
        let content_length = if bodiless_status(status) {
            0
        } else {
            header_text(&response, CONTENT_LENGTH)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(-1)
        };
        let has_body = method_name != "HEAD";

        let mut res = HttpResponse {
            status_code,
            content_length,
            content_type,
            body: Vec::new(),
            body_stream_id: NO_STREAM,
        };

        if has_body && content_length > 0 && content_length <= INLINE_BODY_LIMIT {
            res.body = read_inline(ctx, response, content_length as usize).await?;
        } else if has_body && content_length != 0 {
            // TODO: hand the body to the host over a data stream once one exists.
            res.body_stream_id = PENDING_STREAM;
        }

        tracing::debug!(
            status_code,
            content_length,
            inline = !res.body.is_empty(),
            "upstream responded"
        );
        Ok(res)
    }
}

fn reject(e: BridgeError) -> BridgeOutcome {
    tracing::debug!(error = %e, "call failed");
    BridgeOutcome::Respond(HttpResponse::status(e.status_code()))
}

/// True when `uri` would be read as `//authority...` once the URL parser has
/// dropped the whitespace and control characters it ignores.
fn names_authority(uri: &str) -> bool {
    let mut chars = uri
        .trim_start_matches(|c: char| c <= ' ')
        .chars()
        .filter(|c| !matches!(c, '\t' | '\n' | '\r'));
    let slash = |c: Option<char>| matches!(c, Some('/') | Some('\\'));
    slash(chars.next()) && slash(chars.next())
}

fn bodiless_status(status: StatusCode) -> bool {
    status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

fn header_text(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn read_inline(
    ctx: &CancellationToken,
    mut response: Response,
    len: usize,
) -> Result<Vec<u8>, BridgeError> {
    let mut body = Vec::with_capacity(len);
    while body.len() < len {
        let chunk = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                return Err(BridgeError::UpstreamRead("read cancelled".to_string()))
            }
            chunk = response.chunk() => chunk,
        };
        match chunk {
            Ok(Some(bytes)) => body.extend_from_slice(&bytes),
            Ok(None) => {
                return Err(BridgeError::UpstreamRead(format!(
                    "short body: {} of {len} bytes",
                    body.len()
                )))
            }
            Err(e) => return Err(BridgeError::UpstreamRead(e.to_string())),
        }
    }
    body.truncate(len);
    Ok(body)
}
