use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

/// A response body produced incrementally; an `Err` item aborts the body.
pub type BodyStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// An HTTP status code.
///
/// Any three-digit code is representable so upstream statuses pass through
/// untouched; the constants name the ones the proxy produces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const OK: StatusCode = StatusCode(200);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const BAD_GATEWAY: StatusCode = StatusCode(502);
    pub const GATEWAY_TIMEOUT: StatusCode = StatusCode(504);

    /// Accepts codes in `100..=999`.
    pub fn from_u16(code: u16) -> Option<Self> {
        (100..=999).contains(&code).then_some(StatusCode(code))
    }

    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use keyrelay::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.as_u16(), 200);
    /// assert_eq!(StatusCode::BAD_GATEWAY.as_u16(), 502);
    /// ```
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns the standard reason phrase, or an empty string for codes
    /// without one.
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            402 => "Payment Required",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            409 => "Conflict",
            413 => "Payload Too Large",
            415 => "Unsupported Media Type",
            422 => "Unprocessable Entity",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "",
        }
    }

    /// 1xx, 204 and 304 responses never carry a body.
    pub fn allows_body(&self) -> bool {
        !(self.0 < 200 || self.0 == 204 || self.0 == 304)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Response payload: either fully materialized or streamed.
pub enum Body {
    Full(Vec<u8>),
    Stream(BodyStream),
}

impl Body {
    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    /// The materialized bytes, or `None` for a streamed body.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Full(bytes) => Some(bytes),
            Body::Stream(_) => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Represents a complete HTTP response ready to be sent to a client.
///
/// Headers are kept as an ordered list so repeated names (e.g. Set-Cookie)
/// survive.
#[derive(Debug)]
pub struct Response {
    /// The HTTP status code
    pub status: StatusCode,
    /// HTTP headers as name/value pairs
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Body,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Body,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Full(Vec::new()),
        }
    }

    /// Sets a header, replacing any existing value with the same name.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&key));
        self.headers.push((key, value.into()));
        self
    }

    /// Adds a header without touching existing values of the same name.
    pub fn append_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Sets a fully materialized body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Body::Full(body.into());
        self
    }

    /// Sets a streamed body.
    pub fn stream(mut self, stream: BodyStream) -> Self {
        self.body = Body::Stream(stream);
        self
    }

    /// Builds the final Response.
    ///
    /// A full body gets a Content-Length header unless one is already set.
    /// Streamed bodies never carry Content-Length; the writer frames them.
    pub fn build(mut self) -> Response {
        match &self.body {
            Body::Full(bytes) if self.status.allows_body() => {
                if !has_header(&self.headers, "Content-Length") {
                    self.headers.push(("Content-Length".to_string(), bytes.len().to_string()));
                }
            }
            Body::Full(_) => {}
            Body::Stream(_) => {
                self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case("Content-Length"));
            }
        }

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// Retrieves the first header value with the given name, ignoring ASCII case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Creates a `text/plain` response.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body.into())
            .build()
    }

    /// Creates an `application/json` response.
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", "application/json")
            .body(value.to_string())
            .build()
    }

    /// Creates a JSON error response of the form `{"error": "<message>"}`.
    pub fn error(status: StatusCode, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": message }))
    }

    /// Creates a 401 Unauthorized response.
    pub fn unauthorized() -> Self {
        Self::error(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    /// Creates a 400 Bad Request response.
    pub fn bad_request() -> Self {
        Self::error(StatusCode::BAD_REQUEST, "Bad Request")
    }

    /// Creates a 405 Method Not Allowed response advertising `allow`.
    pub fn method_not_allowed(allow: &str) -> Self {
        let mut response = Self::error(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        response.headers.push(("Allow".to_string(), allow.to_string()));
        response
    }
}

pub(crate) fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}
