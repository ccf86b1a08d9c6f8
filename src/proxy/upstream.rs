//! Upstream request forwarding
//!
//! Builds exactly one outbound request per inbound request and dispatches it
//! to the configured upstream. Write methods get their response body as a
//! stream so relaying can start at the upstream's first byte; read methods
//! get it fully materialized.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::time::timeout;
use url::Url;

use crate::config::UpstreamConfig;
use crate::http::request::{Method, Request};
use crate::proxy::credentials::CredentialPool;
use crate::proxy::error::ForwardError;
use crate::proxy::rewrite::PathRewriter;

/// Upstream response body delivered incrementally.
pub type UpstreamStream = Pin<Box<dyn Stream<Item = Result<Bytes, ForwardError>> + Send>>;

/// Inbound headers that describe the client hop and are never forwarded.
/// Content-Length is recomputed by the client for the body actually sent.
const HOP_BY_HOP_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "upgrade",
    "expect",
    "content-length",
];

/// How the upstream response body is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Relay the body chunk by chunk as it arrives.
    Streamed,
    /// Read the whole body before responding.
    Buffered,
}

impl TransferMode {
    pub fn for_method(method: Method) -> Self {
        if method.is_write() {
            TransferMode::Streamed
        } else {
            TransferMode::Buffered
        }
    }
}

/// Outbound request body.
#[derive(Debug, Clone, PartialEq)]
pub enum ForwardBody {
    /// Body parsed as JSON; re-encoded compactly on the wire.
    Json(serde_json::Value),
    /// Anything that is not JSON, forwarded byte for byte.
    Raw(Vec<u8>),
}

impl ForwardBody {
    /// `None` for an empty body.
    pub fn from_bytes(body: &[u8]) -> Option<Self> {
        if body.is_empty() {
            return None;
        }

        Some(match serde_json::from_slice(body) {
            Ok(value) => ForwardBody::Json(value),
            Err(_) => ForwardBody::Raw(body.to_vec()),
        })
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ForwardBody::Json(value) => value.to_string().into_bytes(),
            ForwardBody::Raw(bytes) => bytes,
        }
    }
}

/// Everything needed to issue the outbound call.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<ForwardBody>,
    pub mode: TransferMode,
}

impl ForwardRequest {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

pub enum UpstreamBody {
    Streamed(UpstreamStream),
    Buffered(Bytes),
}

/// Upstream status, headers and body as received.
pub struct ForwardResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: UpstreamBody,
}

/// Sends requests to the single configured upstream.
pub struct Forwarder {
    client: reqwest::Client,
    base: Url,
    rewriter: PathRewriter,
    credentials: CredentialPool,
    request_timeout: Duration,
    idle_timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder for the upstream described by `config`
    pub fn new(
        config: &UpstreamConfig,
        rewriter: PathRewriter,
        credentials: CredentialPool,
    ) -> anyhow::Result<Self> {
        let base = Url::parse(&config.base_url)?;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .redirect(reqwest::redirect::Policy::none());
        if !config.system_proxy {
            builder = builder.no_proxy();
        }

        Ok(Self {
            client: builder.build()?,
            base,
            rewriter,
            credentials,
            request_timeout: config.request_timeout(),
            idle_timeout: config.idle_timeout(),
        })
    }

    /// Forward `request` and return the upstream response.
    pub async fn forward(&self, request: &Request) -> Result<ForwardResponse, ForwardError> {
        let outbound = self.build(request)?;

        tracing::debug!(
            method = %outbound.method,
            url = %outbound.url,
            mode = ?outbound.mode,
            "Forwarding request upstream"
        );

        self.dispatch(outbound).await
    }

    /// Build the outbound request without sending it.
    ///
    /// Public so the header and body policy can be inspected in tests.
    pub fn build(&self, request: &Request) -> Result<ForwardRequest, ForwardError> {
        let mode = TransferMode::for_method(request.method);
        let url = self.target_url(request)?;

        let credential = self.credentials.select();

        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name))
            .filter(|(name, _)| credential.is_none() || !name.eq_ignore_ascii_case("authorization"))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        if let Some(key) = credential {
            headers.push(("Authorization".to_string(), format!("Bearer {key}")));
        }

        let body = match mode {
            TransferMode::Streamed => ForwardBody::from_bytes(&request.body),
            TransferMode::Buffered => None,
        };

        let missing_content_type = !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
        if matches!(body, Some(ForwardBody::Json(_))) && missing_content_type {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        Ok(ForwardRequest {
            method: request.method,
            url,
            headers,
            body,
            mode,
        })
    }

    /// Send a built request. The single upstream call; no retries.
    pub async fn dispatch(&self, outbound: ForwardRequest) -> Result<ForwardResponse, ForwardError> {
        let method = reqwest::Method::from_bytes(outbound.method.as_str().as_bytes())
            .map_err(|e| ForwardError::Upstream(e.to_string()))?;

        let mut headers = HeaderMap::with_capacity(outbound.headers.len());
        for (name, value) in &outbound.headers {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => tracing::debug!(header = %name, "Dropping header that is not valid on the wire"),
            }
        }

        let mut builder = self.client.request(method, outbound.url).headers(headers);
        if let Some(body) = outbound.body {
            builder = builder.body(body.into_bytes());
        }

        let response = timeout(self.request_timeout, builder.send())
            .await
            .map_err(|_| ForwardError::Timeout(self.request_timeout))?
            .map_err(|e| ForwardError::from_reqwest(e, self.request_timeout))?;

        let status = response.status().as_u16();

        // Keep duplicates (e.g. several Set-Cookie) in order.
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        let body = match outbound.mode {
            TransferMode::Streamed => {
                UpstreamBody::Streamed(idle_guarded(response.bytes_stream(), self.idle_timeout))
            }
            TransferMode::Buffered => {
                let bytes = timeout(self.request_timeout, response.bytes())
                    .await
                    .map_err(|_| ForwardError::Timeout(self.request_timeout))?
                    .map_err(|e| ForwardError::Body(e.to_string()))?;
                UpstreamBody::Buffered(bytes)
            }
        };

        Ok(ForwardResponse { status, headers, body })
    }

    /// Base URL with the rewritten route and the raw query set on it.
    ///
    /// Targets the URL layer would restructure (dot segments, backslashes)
    /// are refused, so the upstream path is always the inbound path with at
    /// most its prefix replaced.
    fn target_url(&self, request: &Request) -> Result<Url, ForwardError> {
        let route = request.route();
        if !route.starts_with('/') {
            return Err(ForwardError::InvalidUrl(format!("request target {route:?} is not origin-form")));
        }

        let path = format!("{}{}", self.base.path().trim_end_matches('/'), self.rewriter.rewrite(route));
        if path.contains('\\') || path.split('/').any(is_dot_segment) {
            return Err(ForwardError::InvalidUrl(format!("path {path:?} is not in normal form")));
        }

        let mut url = self.base.clone();
        url.set_path(&path);
        url.set_query(request.query());
        url.set_fragment(None);

        if url.path().split('/').count() != path.split('/').count() {
            return Err(ForwardError::InvalidUrl(format!("path {path:?} changed to {:?}", url.path())));
        }
        Ok(url)
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("base", &self.base.as_str())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

fn is_dot_segment(segment: &str) -> bool {
    matches!(
        segment.to_ascii_lowercase().as_str(),
        "." | ".." | "%2e" | ".%2e" | "%2e." | "%2e%2e"
    )
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_REQUEST_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Map client errors into `ForwardError` and fail the stream when the
/// upstream goes quiet for longer than `idle`. The stream ends after the
/// first error.
fn idle_guarded<S>(stream: S, idle: Duration) -> UpstreamStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = Some(Box::pin(stream));

    Box::pin(futures::stream::unfold(state, move |state| async move {
        let mut inner = state?;
        match timeout(idle, inner.next()).await {
            Ok(Some(Ok(bytes))) => Some((Ok(bytes), Some(inner))),
            Ok(Some(Err(e))) => Some((Err(ForwardError::from_reqwest(e, idle)), None)),
            Ok(None) => None,
            Err(_) => Some((Err(ForwardError::Timeout(idle)), None)),
        }
    }))
}
