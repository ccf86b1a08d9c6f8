use crate::http::request::{Method, Request};
use thiserror::Error;

/// Upper bound on the request line plus headers.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Upper bound on a single chunk-size line, extensions included.
const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid request line")]
    InvalidRequest,
    #[error("unknown method")]
    InvalidMethod,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("conflicting message length headers")]
    AmbiguousLength,
    #[error("unsupported Transfer-Encoding")]
    UnsupportedTransferEncoding,
    #[error("malformed chunked body")]
    InvalidChunk,
    #[error("request headers exceed {} bytes", MAX_HEADER_BYTES)]
    HeadersTooLarge,
    #[error("incomplete request")]
    Incomplete,
}

/// How the request body is delimited on the wire.
enum Framing {
    Length(usize),
    Chunked,
}

/// Parse one request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied, or
/// `ParseError::Incomplete` when more input is needed. Chunked bodies are
/// decoded; the returned body is always the plain payload.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    // Look for header/body separator
    let headers_end = match find_headers_end(buf) {
        Some(end) if end > MAX_HEADER_BYTES => return Err(ParseError::HeadersTooLarge),
        Some(end) => end,
        None if buf.len() > MAX_HEADER_BYTES => return Err(ParseError::HeadersTooLarge),
        None => return Err(ParseError::Incomplete),
    };
    let header_bytes = &buf[..headers_end];
    let body_start = headers_end + 4;

    let headers_str = std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if parts.next().is_some() || !version.starts_with("HTTP/1.") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    // Headers, in arrival order; repeated names stay separate entries.
    let mut headers = Vec::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;

        let key = key.trim();
        if key.is_empty() {
            return Err(ParseError::InvalidHeader);
        }

        headers.push((key.to_string(), value.trim().to_string()));
    }

    // Body
    let (body, body_len) = match framing(&headers)? {
        Framing::Length(len) => {
            let available = &buf[body_start..];
            if available.len() < len {
                return Err(ParseError::Incomplete);
            }
            (available[..len].to_vec(), len)
        }
        Framing::Chunked => decode_chunked(&buf[body_start..])?,
    };

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body,
    };

    Ok((request, body_start + body_len))
}

fn framing(headers: &[(String, String)]) -> Result<Framing, ParseError> {
    let lengths: Vec<&str> = header_values(headers, "Content-Length").collect();
    let encodings: Vec<&str> = header_values(headers, "Transfer-Encoding").collect();

    if !encodings.is_empty() {
        if !lengths.is_empty() {
            return Err(ParseError::AmbiguousLength);
        }
        return match encodings.as_slice() {
            [coding] if coding.eq_ignore_ascii_case("chunked") => Ok(Framing::Chunked),
            _ => Err(ParseError::UnsupportedTransferEncoding),
        };
    }

    match lengths.split_first() {
        None => Ok(Framing::Length(0)),
        Some((first, rest)) => {
            if rest.iter().any(|other| other != first) {
                return Err(ParseError::AmbiguousLength);
            }
            first
                .parse()
                .map(Framing::Length)
                .map_err(|_| ParseError::InvalidContentLength)
        }
    }
}

/// Decode a chunked body at the start of `buf`.
///
/// Returns the payload and the number of wire bytes consumed, trailers
/// included. Chunk extensions and trailer fields are discarded.
fn decode_chunked(buf: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line = next_line(buf, pos)?;
        let size_field = line.split(|&b| b == b';').next().unwrap_or_default();
        let size_str = std::str::from_utf8(size_field).map_err(|_| ParseError::InvalidChunk)?;
        let size = usize::from_str_radix(size_str.trim(), 16).map_err(|_| ParseError::InvalidChunk)?;
        pos += line.len() + 2;

        if size == 0 {
            break;
        }

        let data_end = pos.checked_add(size).ok_or(ParseError::InvalidChunk)?;
        if buf.len() < data_end || buf.len() - data_end < 2 {
            return Err(ParseError::Incomplete);
        }
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Err(ParseError::InvalidChunk);
        }
        body.extend_from_slice(&buf[pos..data_end]);
        pos = data_end + 2;
    }

    // Trailer section ends at the first empty line.
    loop {
        let line = next_line(buf, pos)?;
        pos += line.len() + 2;
        if line.is_empty() {
            return Ok((body, pos));
        }
    }
}

/// The line starting at `pos`, without its CRLF.
fn next_line(buf: &[u8], pos: usize) -> Result<&[u8], ParseError> {
    let rest = &buf[pos..];
    match rest.windows(2).position(|w| w == b"\r\n") {
        Some(end) if end > MAX_CHUNK_LINE => Err(ParseError::InvalidChunk),
        Some(end) => Ok(&rest[..end]),
        None if rest.len() > MAX_CHUNK_LINE => Err(ParseError::InvalidChunk),
        None => Err(ParseError::Incomplete),
    }
}

/// True when `buf` holds a complete header block that asks for
/// `Expect: 100-continue`.
pub fn expects_continue(buf: &[u8]) -> bool {
    let Some(headers_end) = find_headers_end(buf) else {
        return false;
    };
    let Ok(head) = std::str::from_utf8(&buf[..headers_end]) else {
        return false;
    };

    head.split("\r\n").skip(1).any(|line| {
        line.split_once(':').is_some_and(|(k, v)| {
            k.trim().eq_ignore_ascii_case("Expect") && v.trim().eq_ignore_ascii_case("100-continue")
        })
    })
}

fn header_values<'a>(headers: &'a [(String, String)], name: &'a str) -> impl Iterator<Item = &'a str> {
    headers
        .iter()
        .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
