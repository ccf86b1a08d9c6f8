use bytes::{BufMut, BytesMut};
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::response::{Body, Response};

const HTTP_VERSION: &str = "HTTP/1.1";

/// How a response body ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyOutcome {
    /// Every byte was written and the body was properly terminated.
    Complete,
    /// The body source failed part-way; the terminator was withheld.
    Truncated,
}

/// Framing and connection headers are owned by the writer.
const WRITER_OWNED_HEADERS: &[&str] = &["connection", "transfer-encoding", "keep-alive"];

fn serialize_head(resp: &Response, chunked: bool, keep_alive: bool, http11: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    let with_body = resp.status.allows_body();

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in &resp.headers {
        let owned = WRITER_OWNED_HEADERS.iter().any(|h| k.eq_ignore_ascii_case(h));
        let stale_length = k.eq_ignore_ascii_case("content-length") && (!with_body || resp.body.is_stream());
        if owned || stale_length {
            continue;
        }
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    if chunked {
        buf.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
    }
    if !keep_alive {
        buf.extend_from_slice(b"Connection: close\r\n");
    } else if !http11 {
        // HTTP/1.0 closes by default unless told otherwise.
        buf.extend_from_slice(b"Connection: keep-alive\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    buf
}

/// Serializes a [`Response`] onto a client connection.
///
/// Full bodies are written after a Content-Length header. Streamed bodies use
/// chunked transfer encoding, one chunk per item, or are delimited by closing
/// the connection when the client cannot accept chunked framing.
pub struct ResponseWriter {
    head: Vec<u8>,
    body: Option<Body>,
    chunked: bool,
    keep_alive: bool,
}

impl ResponseWriter {
    /// `http11` is false for HTTP/1.0 clients, which cannot take chunked
    /// framing and need keep-alive announced.
    pub fn new(response: Response, keep_alive: bool, http11: bool) -> Self {
        let streamed = response.status.allows_body() && response.body.is_stream();
        let chunked = streamed && http11;
        // A close-delimited body leaves nothing to reuse.
        let keep_alive = keep_alive && !(streamed && !http11);

        let head = serialize_head(&response, chunked, keep_alive, http11);
        let body = response.status.allows_body().then_some(response.body);

        Self {
            head,
            body,
            chunked,
            keep_alive,
        }
    }

    /// Whether the connection may serve another request afterwards.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub async fn write_to_stream<W>(self, stream: &mut W) -> anyhow::Result<BodyOutcome>
    where
        W: AsyncWrite + Unpin,
    {
        stream.write_all(&self.head).await?;

        let outcome = match self.body {
            None => BodyOutcome::Complete,
            Some(Body::Full(bytes)) => {
                stream.write_all(&bytes).await?;
                BodyOutcome::Complete
            }
            Some(Body::Stream(mut body)) => {
                let mut outcome = BodyOutcome::Complete;

                while let Some(item) = body.next().await {
                    match item {
                        Ok(chunk) if chunk.is_empty() => {}
                        Ok(chunk) if self.chunked => {
                            let mut frame = BytesMut::with_capacity(chunk.len() + 12);
                            frame.put_slice(format!("{:X}\r\n", chunk.len()).as_bytes());
                            frame.put_slice(&chunk);
                            frame.put_slice(b"\r\n");
                            stream.write_all(&frame).await?;
                        }
                        Ok(chunk) => stream.write_all(&chunk).await?,
                        Err(e) => {
                            tracing::warn!(error = %e, "Body source failed mid-stream, truncating response");
                            outcome = BodyOutcome::Truncated;
                            break;
                        }
                    }
                }

                if outcome == BodyOutcome::Complete && self.chunked {
                    stream.write_all(b"0\r\n\r\n").await?;
                }
                outcome
            }
        };

        stream.flush().await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::{ResponseBuilder, StatusCode};
    use bytes::Bytes;

    async fn render(response: Response, keep_alive: bool, http11: bool) -> (String, BodyOutcome) {
        let mut out: Vec<u8> = Vec::new();
        let outcome = ResponseWriter::new(response, keep_alive, http11)
            .write_to_stream(&mut out)
            .await
            .unwrap();
        (String::from_utf8(out).unwrap(), outcome)
    }

    #[tokio::test]
    async fn full_body_uses_content_length() {
        let (wire, outcome) = render(Response::text(StatusCode::OK, "hello"), true, true).await;

        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("Content-Length: 5\r\n"));
        assert!(!wire.contains("Connection:"));
        assert!(wire.ends_with("\r\n\r\nhello"));
        assert_eq!(outcome, BodyOutcome::Complete);
    }

    #[tokio::test]
    async fn streamed_body_is_chunk_framed() {
        let chunks: Vec<anyhow::Result<Bytes>> = vec![Ok(Bytes::from_static(b"data: a\n\n")), Ok(Bytes::from_static(b"data: bb\n\n"))];
        let response = ResponseBuilder::new(StatusCode::OK)
            .stream(Box::pin(futures::stream::iter(chunks)))
            .build();

        let (wire, outcome) = render(response, true, true).await;

        assert!(wire.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!wire.contains("Content-Length"));
        assert!(wire.ends_with("\r\n\r\n9\r\ndata: a\n\n\r\nA\r\ndata: bb\n\n\r\n0\r\n\r\n"));
        assert_eq!(outcome, BodyOutcome::Complete);
    }

    #[tokio::test]
    async fn failed_stream_withholds_terminator() {
        let chunks: Vec<anyhow::Result<Bytes>> = vec![Ok(Bytes::from_static(b"part")), Err(anyhow::anyhow!("reset"))];
        let response = ResponseBuilder::new(StatusCode::OK)
            .stream(Box::pin(futures::stream::iter(chunks)))
            .build();

        let (wire, outcome) = render(response, true, true).await;

        assert!(wire.ends_with("4\r\npart\r\n"));
        assert_eq!(outcome, BodyOutcome::Truncated);
    }

    #[tokio::test]
    async fn http10_stream_is_close_delimited() {
        let chunks: Vec<anyhow::Result<Bytes>> = vec![Ok(Bytes::from_static(b"raw"))];
        let response = ResponseBuilder::new(StatusCode::OK)
            .stream(Box::pin(futures::stream::iter(chunks)))
            .build();

        let writer = ResponseWriter::new(response, true, false);
        assert!(!writer.keep_alive());

        let mut out: Vec<u8> = Vec::new();
        writer.write_to_stream(&mut out).await.unwrap();
        let wire = String::from_utf8(out).unwrap();

        assert!(wire.contains("Connection: close\r\n"));
        assert!(!wire.contains("Transfer-Encoding"));
        assert!(wire.ends_with("\r\n\r\nraw"));
    }

    #[tokio::test]
    async fn http10_keep_alive_is_announced() {
        let (wire, _) = render(Response::text(StatusCode::OK, "up"), true, false).await;

        assert!(wire.contains("Connection: keep-alive\r\n"));
        assert!(wire.contains("Content-Length: 2\r\n"));

        let (closing, _) = render(Response::text(StatusCode::OK, "up"), false, false).await;
        assert!(closing.contains("Connection: close\r\n"));
        assert!(!closing.contains("keep-alive"));
    }

    #[tokio::test]
    async fn interim_continue_is_bare_status_line() {
        let (wire, _) = render(ResponseBuilder::new(StatusCode::CONTINUE).build(), true, true).await;

        assert_eq!(wire, "HTTP/1.1 100 Continue\r\n\r\n");
    }

    #[tokio::test]
    async fn no_content_drops_body_and_length() {
        let response = ResponseBuilder::new(StatusCode::from_u16(204).unwrap())
            .header("Content-Length", "3")
            .body("abc")
            .build();

        let (wire, _) = render(response, true, true).await;

        assert_eq!(wire, "HTTP/1.1 204 No Content\r\n\r\n");
    }
}
