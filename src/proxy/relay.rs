//! Response relay
//!
//! Turns an upstream response into the response written to the caller.

use bytes::Bytes;
use futures::StreamExt;

use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::proxy::upstream::{ForwardResponse, UpstreamBody, UpstreamStream};

/// Largest piece a streamed body is relayed in.
pub const CHUNK_SIZE: usize = 8192;

/// Framing headers recomputed by our own writer, never copied from upstream.
const FRAMING_HEADERS: &[&str] = &["content-length", "transfer-encoding", "connection"];

/// Upstream headers minus framing headers, order and duplicates preserved.
pub fn filter_headers(headers: Vec<(String, String)>) -> Vec<(String, String)> {
    headers
        .into_iter()
        .filter(|(name, _)| !FRAMING_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)))
        .collect()
}

/// Split every item into pieces of at most `max` bytes. Small items are
/// passed on as they arrive, never merged.
pub fn rechunk(stream: UpstreamStream, max: usize) -> UpstreamStream {
    assert!(max > 0, "chunk size must be non-zero");

    Box::pin(stream.flat_map(move |item| {
        let pieces = match item {
            Ok(mut bytes) => {
                let mut pieces: Vec<Result<Bytes, _>> = Vec::with_capacity(bytes.len() / max + 1);
                while bytes.len() > max {
                    pieces.push(Ok(bytes.split_to(max)));
                }
                if !bytes.is_empty() {
                    pieces.push(Ok(bytes));
                }
                pieces
            }
            Err(e) => vec![Err(e)],
        };
        futures::stream::iter(pieces)
    }))
}

/// Build the caller-facing response: status verbatim, framing headers
/// dropped, body streamed or written whole according to how it was fetched.
pub fn relay(upstream: ForwardResponse) -> Response {
    // The forwarder only hands over statuses hyper accepted.
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let builder = filter_headers(upstream.headers)
        .into_iter()
        .fold(ResponseBuilder::new(status), |builder, (name, value)| {
            builder.append_header(name, value)
        });

    match upstream.body {
        UpstreamBody::Streamed(stream) => {
            let body = rechunk(stream, CHUNK_SIZE).map(|item| item.map_err(anyhow::Error::from));
            builder.stream(Box::pin(body)).build()
        }
        UpstreamBody::Buffered(bytes) => builder.body(bytes.to_vec()).build(),
    }
}
